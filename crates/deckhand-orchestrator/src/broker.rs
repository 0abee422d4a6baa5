// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker transport.
//!
//! Queues are named lists on the broker; delivery is at-least-once in
//! cooperation with the worker, which pushes a frame back on retryable
//! failure. Within one queue ordering is FIFO best-effort; nothing is
//! guaranteed across queues.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use deckhand_core::error::{CoreError, Plane};

/// Queue transport used by the submitter and the worker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a frame to a queue.
    async fn send(&self, queue: &str, frame: &str) -> Result<(), CoreError>;

    /// Pop the oldest frame from a queue, waiting up to `wait`.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<String>, CoreError>;
}

fn broker_error(err: redis::RedisError) -> CoreError {
    CoreError::ExternalRetryable {
        plane: Plane::Broker,
        detail: err.to_string(),
    }
}

/// Redis-list backed broker.
pub struct RedisBroker {
    manager: redis::aio::ConnectionManager,
}

impl RedisBroker {
    /// Connect to the broker at the given URL.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(url).map_err(broker_error)?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(broker_error)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn send(&self, queue: &str, frame: &str) -> Result<(), CoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.lpush(queue, frame).await.map_err(broker_error)?;
        debug!(queue = %queue, "Frame sent");
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<String>, CoreError> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = conn
            .brpop(queue, wait.as_secs_f64())
            .await
            .map_err(broker_error)?;
        Ok(popped.map(|(_, frame)| frame))
    }
}

/// In-process broker for tests and local development.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames currently queued, oldest first.
    pub fn queued(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, queue: &str, frame: &str) -> Result<(), CoreError> {
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_back(frame.to_string());
        Ok(())
    }

    async fn receive(&self, queue: &str, _wait: Duration) -> Result<Option<String>, CoreError> {
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }
}
