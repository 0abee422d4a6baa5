// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations.
//!
//! Embedded at compile time; safe to run repeatedly - already-applied
//! migrations are skipped.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// All core migrations, embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run all migrations against the given pool.
pub async fn run(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
