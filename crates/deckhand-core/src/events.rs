// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-sent event hub.
//!
//! Workers publish status events addressed to the submitting user; the
//! outer HTTP layer subscribes per user and streams them out. Events for a
//! user with no subscribers are dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of each per-user channel; slow subscribers lose oldest events.
const CHANNEL_CAPACITY: usize = 64;

/// A server-sent event addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// Event name, e.g. `taskStatus`.
    pub event: String,
    /// JSON-encoded payload.
    pub data: String,
}

impl SseEvent {
    /// A `taskStatus` event for a completed task.
    pub fn task_status(entity_name: &str, task_description: &str, status: &str) -> Self {
        Self {
            event: "taskStatus".to_string(),
            data: serde_json::json!({
                "entity_name": entity_name,
                "task_description": task_description,
                "status": status,
            })
            .to_string(),
        }
    }

    /// A `toolStatus` event for a tool deployment transition.
    pub fn tool_status(tool_name: &str, version: &str, tool_id: i64, status: &str) -> Self {
        Self {
            event: "toolStatus".to_string(),
            data: serde_json::json!({
                "toolName": tool_name,
                "version": version,
                "tool_id": tool_id,
                "status": status,
            })
            .to_string(),
        }
    }

    /// A `homeStatus` event for a home directory reset.
    pub fn home_status(status: &str) -> Self {
        Self {
            event: "homeStatus".to_string(),
            data: serde_json::json!({ "status": status }).to_string(),
        }
    }
}

/// Per-user broadcast channels.
pub struct EventHub {
    channels: Mutex<HashMap<String, broadcast::Sender<SseEvent>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to events addressed to a user.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<SseEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to a user's channel. Returns the number of
    /// subscribers it reached.
    pub fn publish(&self, user_id: &str, event: SseEvent) -> usize {
        let channels = self.channels.lock().unwrap();
        match channels.get(user_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => {
                debug!(user_id = %user_id, event = %event.event, "No subscribers for event");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("github|1");

        let sent = hub.publish(
            "github|1",
            SseEvent::task_status("test-bucket-1", "creating s3 bucket", "COMPLETED"),
        );
        assert_eq!(sent, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "taskStatus");
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["entity_name"], "test-bucket-1");
        assert_eq!(data["status"], "COMPLETED");
    }

    #[tokio::test]
    async fn test_events_are_scoped_per_user() {
        let hub = EventHub::new();
        let mut alice = hub.subscribe("github|alice");
        let _bob = hub.subscribe("github|bob");

        hub.publish("github|bob", SseEvent::home_status("Resetting"));

        assert!(alice.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = EventHub::new();
        assert_eq!(hub.publish("github|nobody", SseEvent::home_status("Reset")), 0);
    }

    #[test]
    fn test_tool_status_payload_shape() {
        let event = SseEvent::tool_status("rstudio", "1.0.0", 7, "Deploying");
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["toolName"], "rstudio");
        assert_eq!(data["tool_id"], 7);
        assert_eq!(data["status"], "Deploying");
    }
}
