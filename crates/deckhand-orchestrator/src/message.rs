// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task message wire format.
//!
//! The frame layout is fixed for compatibility with the existing worker
//! ecosystem: a JSON envelope of headers, properties and a base64 body,
//! with the whole envelope JSON-encoded and base64-wrapped again. Field
//! names are preserved bit-for-bit.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use uuid::Uuid;

use deckhand_core::error::CoreError;

const CONTENT_TYPE: &str = "application/json";
const CONTENT_ENCODING: &str = "utf-8";
const BODY_ENCODING: &str = "base64";
const DEFAULT_PRIORITY: u8 = 0;

/// Nodename of this process, used for the `origin` header.
fn anon_nodename() -> String {
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", std::process::id(), hostname)
}

/// A task message bound for a named queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    /// Task id; also the message correlation id.
    pub task_id: Uuid,
    /// Registered handler name.
    pub task_name: String,
    /// Destination queue; also the routing key.
    pub queue_name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl TaskMessage {
    /// Build a message, validating the inputs.
    pub fn new(
        task_id: Uuid,
        task_name: &str,
        queue_name: &str,
        args: Vec<Value>,
    ) -> Result<Self, CoreError> {
        if task_name.is_empty() {
            return Err(CoreError::validation("task_name", "must not be blank"));
        }
        if queue_name.is_empty() {
            return Err(CoreError::validation("queue_name", "must not be blank"));
        }
        Ok(Self {
            task_id,
            task_name: task_name.to_string(),
            queue_name: queue_name.to_string(),
            args,
        })
    }

    /// Render the framed message.
    pub fn encode(&self) -> String {
        let id = self.task_id.to_string();
        let body = json!([
            self.args,
            {},
            {
                "callbacks": null,
                "errbacks": null,
                "chain": null,
                "chord": null,
            },
        ]);
        let encoded_body = BASE64.encode(body.to_string());

        let message = json!({
            "headers": {
                "lang": "py",
                "task": self.task_name,
                "id": id,
                "group": null,
                "root_id": id,
                "parent_id": null,
                "origin": anon_nodename(),
            },
            "properties": {
                "correlation_id": id,
                "body_encoding": BODY_ENCODING,
                "delivery_tag": Uuid::new_v4().to_string(),
                "delivery_info": {
                    "priority": DEFAULT_PRIORITY,
                    "routing_key": self.queue_name,
                },
            },
            "body": encoded_body,
            "content-encoding": CONTENT_ENCODING,
            "content-type": CONTENT_TYPE,
        });

        BASE64.encode(message.to_string())
    }

    /// Decode and validate a framed message.
    pub fn decode(frame: &str) -> Result<Self, CoreError> {
        let envelope = BASE64
            .decode(frame.trim())
            .map_err(|e| CoreError::validation("message", format!("bad frame base64: {}", e)))?;
        let message: Value = serde_json::from_slice(&envelope)
            .map_err(|e| CoreError::validation("message", format!("bad frame JSON: {}", e)))?;

        if message.get("content-encoding").and_then(Value::as_str) != Some(CONTENT_ENCODING) {
            return Err(CoreError::validation("message", "unexpected content-encoding"));
        }
        if message.get("content-type").and_then(Value::as_str) != Some(CONTENT_TYPE) {
            return Err(CoreError::validation("message", "unexpected content-type"));
        }

        let headers = message
            .get("headers")
            .ok_or_else(|| CoreError::validation("message", "missing headers"))?;
        let id = headers
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("message", "missing task id"))?;
        let root_id = headers.get("root_id").and_then(Value::as_str);
        let correlation_id = message
            .get("properties")
            .and_then(|p| p.get("correlation_id"))
            .and_then(Value::as_str);
        if root_id != Some(id) || correlation_id != Some(id) {
            return Err(CoreError::validation(
                "message",
                "id, root_id and correlation_id must agree",
            ));
        }
        let task_id = Uuid::parse_str(id)
            .map_err(|_| CoreError::validation("message", "task id must be a uuid"))?;
        let task_name = headers
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("message", "missing task name"))?;

        let routing_key = message
            .get("properties")
            .and_then(|p| p.get("delivery_info"))
            .and_then(|d| d.get("routing_key"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let body_raw = message
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("message", "missing body"))?;
        let decoded_body = BASE64
            .decode(body_raw)
            .map_err(|e| CoreError::validation("message", format!("bad body base64: {}", e)))?;
        let body: Value = serde_json::from_slice(&decoded_body)
            .map_err(|e| CoreError::validation("message", format!("bad body JSON: {}", e)))?;
        let parts = body
            .as_array()
            .ok_or_else(|| CoreError::validation("message", "body must be a list"))?;
        let args = parts
            .first()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Self::new(task_id, task_name, routing_key, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> TaskMessage {
        TaskMessage::new(
            Uuid::new_v4(),
            "create_s3bucket",
            "control-panel-s3",
            vec![json!(7), json!("github|1234"), json!("USER")],
        )
        .unwrap()
    }

    fn decode_envelope(frame: &str) -> Value {
        let bytes = BASE64.decode(frame).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_frame_field_names_preserved() {
        let msg = message();
        let envelope = decode_envelope(&msg.encode());

        let headers = &envelope["headers"];
        assert_eq!(headers["lang"], "py");
        assert_eq!(headers["task"], "create_s3bucket");
        assert_eq!(headers["id"], headers["root_id"]);
        assert!(headers["group"].is_null());
        assert!(headers["parent_id"].is_null());
        let origin = headers["origin"].as_str().unwrap();
        assert!(origin.contains('@'), "origin is pid@hostname, got {}", origin);

        let properties = &envelope["properties"];
        assert_eq!(properties["correlation_id"], headers["id"]);
        assert_eq!(properties["body_encoding"], "base64");
        assert!(properties["delivery_tag"].is_string());
        assert_eq!(properties["delivery_info"]["routing_key"], "control-panel-s3");
        assert_eq!(properties["delivery_info"]["priority"], 0);

        assert_eq!(envelope["content-type"], "application/json");
        assert_eq!(envelope["content-encoding"], "utf-8");
    }

    #[test]
    fn test_body_is_double_encoded_positional_args() {
        let msg = message();
        let envelope = decode_envelope(&msg.encode());
        let body_bytes = BASE64
            .decode(envelope["body"].as_str().unwrap())
            .unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap();

        assert_eq!(body[0], json!([7, "github|1234", "USER"]));
        assert_eq!(body[1], json!({}));
        assert!(body[2]["callbacks"].is_null());
        assert!(body[2]["errbacks"].is_null());
        assert!(body[2]["chain"].is_null());
        assert!(body[2]["chord"].is_null());
    }

    #[test]
    fn test_round_trip() {
        let msg = message();
        let decoded = TaskMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TaskMessage::decode("not base64 at all!").is_err());
        assert!(TaskMessage::decode(&BASE64.encode("not json")).is_err());
    }

    #[test]
    fn test_decode_rejects_mismatched_ids() {
        let msg = message();
        let mut envelope = decode_envelope(&msg.encode());
        envelope["headers"]["root_id"] = json!(Uuid::new_v4().to_string());
        let frame = BASE64.encode(envelope.to_string());
        assert!(TaskMessage::decode(&frame).is_err());
    }

    #[test]
    fn test_blank_names_rejected() {
        assert!(TaskMessage::new(Uuid::new_v4(), "", "q", vec![]).is_err());
        assert!(TaskMessage::new(Uuid::new_v4(), "t", "", vec![]).is_err());
    }
}
