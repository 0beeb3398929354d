//! Job lifecycle event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
        attempt: u32,
    },
    JobProgress {
        job_id: JobId,
        progress: f32,
        stage: String,
    },
    JobRetrying {
        job_id: JobId,
        error: String,
    },
    JobSucceeded {
        job_id: JobId,
        artifacts: usize,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
}

impl EventPayload {
    /// Job this event refers to.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobQueued { job_id }
            | Self::JobStarted { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobRetrying { job_id, .. }
            | Self::JobSucceeded { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => *job_id,
        }
    }
}

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self) -> Vec<Event> {
        self.recent.read().iter().cloned().collect()
    }

    /// Recent events concerning one job, oldest first.
    pub fn events_for(&self, job_id: JobId) -> Vec<Event> {
        self.recent
            .read()
            .iter()
            .filter(|e| e.payload.job_id() == job_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = JobId::new();

        bus.broadcast(EventPayload::JobQueued { job_id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload.job_id(), job_id);
        assert!(matches!(event.payload, EventPayload::JobQueued { .. }));
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let bus = EventBus::default();
        let job_id = JobId::new();
        for _ in 0..(MAX_RECENT_EVENTS + 10) {
            bus.broadcast(EventPayload::JobCancelled { job_id });
        }
        assert_eq!(bus.recent_events().len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn events_for_filters_by_job() {
        let bus = EventBus::default();
        let a = JobId::new();
        let b = JobId::new();
        bus.broadcast(EventPayload::JobQueued { job_id: a });
        bus.broadcast(EventPayload::JobQueued { job_id: b });
        bus.broadcast(EventPayload::JobStarted { job_id: a, attempt: 1 });
        assert_eq!(bus.events_for(a).len(), 2);
        assert_eq!(bus.events_for(b).len(), 1);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let job_id = JobId::new();
        let json = serde_json::to_value(EventPayload::JobSucceeded {
            job_id,
            artifacts: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "job_succeeded");
        assert_eq!(json["artifacts"], 3);
    }
}
