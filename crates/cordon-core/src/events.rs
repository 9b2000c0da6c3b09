//! Event bus for Cordon.
//!
//! Every state transition and stage lifecycle event is published as a
//! structured [`EngineEvent`] on a broadcast channel. This is the engine's
//! audit/metrics sink interface: observability collaborators subscribe and
//! materialize the stream however they like. The bus is plumbing, not the
//! source of truth — the persisted incident record is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::incident::{DecisionVerdict, IncidentStatus, Severity};
use crate::stage::StageKind;

/// Default capacity of the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events emitted by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// An incident record was created from a validated alert.
    IncidentCreated {
        incident_id: Uuid,
        alert_id: String,
    },

    /// A state transition was persisted, together with its audit entry.
    TransitionRecorded {
        incident_id: Uuid,
        from_status: IncidentStatus,
        to_status: IncidentStatus,
        timestamp: DateTime<Utc>,
        actor: String,
        detail: String,
    },

    /// A stage entry began (first attempt).
    StageStarted {
        incident_id: Uuid,
        stage: StageKind,
        epoch: u32,
    },

    /// A transient failure triggered a retry.
    StageRetried {
        incident_id: Uuid,
        stage: StageKind,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },

    /// A stage entry finished successfully.
    StageCompleted {
        incident_id: Uuid,
        stage: StageKind,
        attempts: u32,
    },

    /// A stage entry failed (permanently or after retry exhaustion).
    StageFailed {
        incident_id: Uuid,
        stage: StageKind,
        attempts: u32,
        permanent: bool,
        reason: String,
    },

    /// A human approval was requested for an incident.
    ApprovalRequested {
        incident_id: Uuid,
        severity: Severity,
        notified: bool,
    },

    /// An approval decision was applied.
    ApprovalResolved {
        incident_id: Uuid,
        verdict: DecisionVerdict,
        actor: String,
    },

    /// The notifier failed to deliver a decision request. Non-fatal.
    NotificationFailed {
        incident_id: Uuid,
        reason: String,
    },

    /// An incident was cancelled by an operator.
    IncidentCancelled {
        incident_id: Uuid,
        actor: String,
    },
}

/// Broadcast-based event bus.
///
/// Slow subscribers lag and drop the oldest events; consumers that need a
/// complete record read the persisted audit trail instead.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Publishing never fails: with no subscribers the event is dropped.
    pub fn publish(&self, event: EngineEvent) {
        trace!(?event, "publishing engine event");
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.publish(EngineEvent::IncidentCreated {
            incident_id: id,
            alert_id: "a-1".to_string(),
        });

        match rx.recv().await {
            Ok(EngineEvent::IncidentCreated { incident_id, .. }) => {
                assert_eq!(incident_id, id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::IncidentCancelled {
            incident_id: Uuid::new_v4(),
            actor: "operator".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
