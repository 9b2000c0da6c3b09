//! Audit trail collection.
//!
//! Subscribes to the engine's event bus and materializes the stream of
//! recorded transitions for compliance queries and export. The per-incident
//! source of truth stays on the incident record; this collector is the
//! cross-incident view an external audit sink would receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use cordon_core::{EngineEvent, IncidentStatus};

/// One collected transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The incident that transitioned.
    pub incident_id: Uuid,
    /// State before the transition.
    pub from_status: IncidentStatus,
    /// State after the transition.
    pub to_status: IncidentStatus,
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// Who drove the transition.
    pub actor: String,
    /// Human-readable context.
    pub detail: String,
}

/// Bounded in-memory audit log.
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditRecord>>>,
    max_entries: usize,
    log_to_tracing: bool,
}

impl AuditLog {
    /// Creates a new audit log.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: true,
        }
    }

    /// Creates an audit log without tracing output.
    pub fn without_tracing(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: false,
        }
    }

    /// Appends a record, evicting the oldest past capacity.
    pub async fn record(&self, record: AuditRecord) {
        if self.log_to_tracing {
            info!(
                incident_id = %record.incident_id,
                from = %record.from_status,
                to = %record.to_status,
                actor = %record.actor,
                "audit: {}",
                record.detail
            );
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// All collected records, oldest first.
    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// Records for one incident, oldest first.
    pub async fn for_incident(&self, incident_id: Uuid) -> Vec<AuditRecord> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|r| r.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// Number of collected records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing has been collected.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Exports the collected records as JSON.
    pub async fn export_json(&self) -> String {
        let entries = self.entries().await;
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Spawns a task that feeds transition events from the bus into the log.
///
/// The task ends when the bus closes. A lagging subscription drops the
/// oldest events and keeps going; the per-incident trail on the record is
/// still complete.
pub fn spawn_audit_collector(
    log: Arc<AuditLog>,
    mut receiver: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(EngineEvent::TransitionRecorded {
                    incident_id,
                    from_status,
                    to_status,
                    timestamp,
                    actor,
                    detail,
                }) => {
                    log.record(AuditRecord {
                        incident_id,
                        from_status,
                        to_status,
                        timestamp,
                        actor,
                        detail,
                    })
                    .await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "audit collector lagged; dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_core::EventBus;

    fn record(incident_id: Uuid, to_status: IncidentStatus) -> AuditRecord {
        AuditRecord {
            incident_id,
            from_status: IncidentStatus::New,
            to_status,
            timestamp: Utc::now(),
            actor: "orchestrator".to_string(),
            detail: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let log = AuditLog::without_tracing(100);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        log.record(record(a, IncidentStatus::Enriching)).await;
        log.record(record(b, IncidentStatus::Enriching)).await;
        log.record(record(a, IncidentStatus::Failed)).await;

        assert_eq!(log.len().await, 3);
        assert_eq!(log.for_incident(a).await.len(), 2);
        assert_eq!(log.for_incident(b).await.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = AuditLog::without_tracing(2);
        let id = Uuid::new_v4();

        log.record(record(id, IncidentStatus::Enriching)).await;
        log.record(record(id, IncidentStatus::Triaging)).await;
        log.record(record(id, IncidentStatus::Triaged)).await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_status, IncidentStatus::Triaging);
    }

    #[tokio::test]
    async fn test_collector_materializes_transitions() {
        let bus = EventBus::new(64);
        let log = Arc::new(AuditLog::without_tracing(100));
        let handle = spawn_audit_collector(Arc::clone(&log), bus.subscribe());

        let incident_id = Uuid::new_v4();
        bus.publish(EngineEvent::TransitionRecorded {
            incident_id,
            from_status: IncidentStatus::New,
            to_status: IncidentStatus::Enriching,
            timestamp: Utc::now(),
            actor: "orchestrator".to_string(),
            detail: "alert ingested".to_string(),
        });
        // Non-transition events are ignored.
        bus.publish(EngineEvent::IncidentCreated {
            incident_id,
            alert_id: "a-1".to_string(),
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(log.len().await, 1);
        assert_eq!(log.for_incident(incident_id).await[0].detail, "alert ingested");

        drop(bus);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_export_json() {
        let log = AuditLog::without_tracing(10);
        log.record(record(Uuid::new_v4(), IncidentStatus::Completed))
            .await;
        let json = log.export_json().await;
        assert!(json.contains("completed"));
    }
}
