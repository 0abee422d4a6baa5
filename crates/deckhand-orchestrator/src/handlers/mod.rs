// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Action handlers.
//!
//! Each handler composes the plane adapters to enact one task type. Every
//! step is idempotent by construction: a redelivered message converges on
//! the desired state instead of duplicating side-effects.

pub mod app;
pub mod policy;
pub mod s3;
pub mod tool;
pub mod user;

use serde_json::Value;

use deckhand_core::error::CoreError;
use deckhand_core::model::TaskRecord;

use crate::context::RuntimeContext;

/// Positional i64 argument.
pub(crate) fn arg_i64(args: &[Value], index: usize, name: &str) -> Result<i64, CoreError> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::validation(name, format!("missing integer arg {}", index)))
}

/// Positional string argument.
pub(crate) fn arg_str<'a>(
    args: &'a [Value],
    index: usize,
    name: &str,
) -> Result<&'a str, CoreError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::validation(name, format!("missing string arg {}", index)))
}

/// Positional bool argument.
pub(crate) fn arg_bool(args: &[Value], index: usize, name: &str) -> Result<bool, CoreError> {
    args.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| CoreError::validation(name, format!("missing bool arg {}", index)))
}

/// Positional string-array argument.
pub(crate) fn arg_str_vec(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<Vec<String>, CoreError> {
    let list = args
        .get(index)
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::validation(name, format!("missing list arg {}", index)))?;
    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Whether the task has been cancelled since delivery. Checked by long
/// handlers at well-defined checkpoints.
pub(crate) async fn is_cancelled(
    ctx: &RuntimeContext,
    task: Option<&TaskRecord>,
) -> Result<bool, CoreError> {
    let Some(task) = task else {
        return Ok(false);
    };
    Ok(ctx
        .store
        .get_task(task.task_id)
        .await?
        .map(|row| row.cancelled)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arg_extraction() {
        let args = vec![json!(7), json!("github|1"), json!(true), json!(["dev", "prod"])];
        assert_eq!(arg_i64(&args, 0, "id").unwrap(), 7);
        assert_eq!(arg_str(&args, 1, "user").unwrap(), "github|1");
        assert!(arg_bool(&args, 2, "flag").unwrap());
        assert_eq!(arg_str_vec(&args, 3, "envs").unwrap(), vec!["dev", "prod"]);
    }

    #[test]
    fn test_missing_args_are_validation_errors() {
        let args = vec![json!("seven")];
        assert!(arg_i64(&args, 0, "id").is_err());
        assert!(arg_str(&args, 1, "user").is_err());
    }
}
