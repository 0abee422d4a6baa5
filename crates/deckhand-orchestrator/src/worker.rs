// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue worker.
//!
//! Consumes frames from one queue and dispatches them to registered
//! handlers. Delivery is at-least-once: a task already marked complete is
//! acknowledged without re-running, a retryable failure pushes the frame
//! back, and a permanent failure leaves the row incomplete so it ages into
//! the failed state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use deckhand_core::events::SseEvent;
use deckhand_core::model::TaskStatus;

use crate::broker::Broker;
use crate::context::RuntimeContext;
use crate::message::TaskMessage;
use crate::registry::{Outcome, Registry};

/// How long one receive call blocks before looping.
const RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// A single-queue worker.
pub struct Worker {
    ctx: Arc<RuntimeContext>,
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    queue: String,
    shutdown: Arc<Notify>,
}

impl Worker {
    /// Create a worker bound to one queue.
    pub fn new(
        ctx: Arc<RuntimeContext>,
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            broker,
            registry,
            queue: queue.into(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the consume loop until shutdown.
    pub async fn run(self) {
        info!(queue = %self.queue, handlers = ?self.registry.names(), "Worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = %self.queue, "Worker shutting down");
                    break;
                }
                received = self.broker.receive(&self.queue, RECEIVE_WAIT) => {
                    match received {
                        Ok(Some(frame)) => self.process_frame(&frame).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(queue = %self.queue, error = %e, "Broker receive failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Decode, dispatch and settle one frame.
    pub async fn process_frame(&self, frame: &str) {
        let message = match TaskMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        let task_row = match self.ctx.store.get_task(message.task_id).await {
            Ok(row) => row,
            Err(e) => {
                error!(task_id = %message.task_id, error = %e, "Cannot load task row");
                None
            }
        };

        if let Some(row) = &task_row {
            if row.completed {
                info!(task_id = %row.task_id, "Task already completed, acknowledging");
                return;
            }
            if row.cancelled {
                info!(task_id = %row.task_id, "Task cancelled, skipping");
                return;
            }
        }

        let Some(handler) = self.registry.get(&message.task_name) else {
            error!(task_name = %message.task_name, "No handler registered, dropping");
            return;
        };

        info!(
            task_id = %message.task_id,
            task_name = %message.task_name,
            "Running task"
        );
        let outcome = Outcome::from_result(
            handler
                .handle(&self.ctx, task_row.as_ref(), &message.args)
                .await,
        );

        match outcome {
            Outcome::Done => {
                let Some(row) = task_row else {
                    // no row was written for this frame; nothing to settle
                    return;
                };
                if let Err(e) = self.ctx.store.mark_task_completed(row.task_id).await {
                    // not marked complete: the redelivered task must re-run
                    error!(task_id = %row.task_id, error = %e, "Cannot mark task complete");
                    return;
                }
                self.ctx.events.publish(
                    &row.user_id,
                    SseEvent::task_status(
                        &row.entity_description,
                        &row.task_description,
                        TaskStatus::Completed.as_str(),
                    ),
                );
                info!(task_id = %row.task_id, "Task completed");
            }
            Outcome::Retry(reason) => {
                warn!(task_id = %message.task_id, reason = %reason, "Task will be retried");
                if let Some(row) = &task_row {
                    let _ = self.ctx.store.mark_task_retried(row.task_id, Utc::now()).await;
                }
                if let Err(e) = self.broker.send(&self.queue, frame).await {
                    error!(task_id = %message.task_id, error = %e, "Cannot requeue frame");
                }
            }
            Outcome::Fail { kind, detail } => {
                error!(
                    task_id = %message.task_id,
                    kind = %kind,
                    detail = %detail,
                    "Task failed permanently"
                );
            }
        }
    }
}
