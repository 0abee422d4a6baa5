// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deckhand Orchestrator - the task orchestration core.
//!
//! Accepts intents from callers, persists task rows, enqueues framed
//! messages to named queues, and processes delivered messages through
//! registered action handlers that compose the plane adapters.

#![warn(missing_docs)]

pub mod broker;
pub mod context;
pub mod handlers;
pub mod intents;
pub mod message;
pub mod registry;
pub mod tasks;
pub mod worker;

pub use broker::{Broker, InMemoryBroker, RedisBroker};
pub use context::RuntimeContext;
pub use intents::Intents;
pub use message::TaskMessage;
pub use registry::{Outcome, Registry, TaskHandler};
pub use tasks::{Submitter, TaskSubmission};
pub use worker::Worker;
