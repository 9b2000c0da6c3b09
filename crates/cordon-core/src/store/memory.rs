//! In-memory state store.
//!
//! The default backend for tests and single-process deployments. A durable
//! deployment implements [`StateStore`] against a real database; the
//! version-checked write contract is identical.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StateStore, StoreError};
use crate::incident::{Incident, IncidentStatus};

/// Thread-safe in-memory implementation of [`StateStore`].
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<RwLock<HashMap<Uuid, Incident>>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self, incident: Incident) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&incident.id) {
            return Err(StoreError::AlreadyExists(incident.id));
        }
        records.insert(incident.id, incident);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Incident, StoreError> {
        let records = self.records.read().await;
        records.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        mut incident: Incident,
        expected_version: u64,
    ) -> Result<Incident, StoreError> {
        let mut records = self.records.write().await;
        let stored = records
            .get(&incident.id)
            .ok_or(StoreError::NotFound(incident.id))?;

        if stored.status.is_terminal() {
            return Err(StoreError::TerminalIncident(incident.id));
        }
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: incident.id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        if incident.audit_trail.len() < stored.audit_trail.len() {
            return Err(StoreError::InvariantViolation {
                id: incident.id,
                reason: "audit trail may only grow".to_string(),
            });
        }

        incident.version = expected_version + 1;
        records.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn list(&self) -> Result<Vec<Incident>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn list_by_status(&self, status: IncidentStatus) -> Result<Vec<Incident>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{Alert, AlertKind, Indicator, IndicatorKind};
    use chrono::Utc;

    fn sample_incident() -> Incident {
        Incident::from_alert(Alert {
            alert_id: "alert-1".to_string(),
            kind: AlertKind::Informational,
            source_ip: "203.0.113.10".to_string(),
            indicators: vec![Indicator::new(IndicatorKind::Domain, "example.com")],
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;

        store.create(incident).await.unwrap();
        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;

        store.create(incident.clone()).await.unwrap();
        assert_eq!(
            store.create(incident).await,
            Err(StoreError::AlreadyExists(id))
        );
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;
        store.create(incident).await.unwrap();

        let mut loaded = store.load(id).await.unwrap();
        loaded.record_transition(IncidentStatus::Enriching, "orchestrator", "started");
        let stored = store.update(loaded, 1).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, IncidentStatus::Enriching);
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;
        store.create(incident).await.unwrap();

        let mut first = store.load(id).await.unwrap();
        let mut second = first.clone();

        first.record_transition(IncidentStatus::Enriching, "orchestrator", "started");
        store.update(first, 1).await.unwrap();

        second.record_transition(IncidentStatus::Cancelled, "operator", "cancelled");
        assert!(matches!(
            store.update(second, 1).await,
            Err(StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_terminal_records_reject_writes() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;
        store.create(incident).await.unwrap();

        let mut loaded = store.load(id).await.unwrap();
        loaded.record_transition(IncidentStatus::Cancelled, "operator", "cancelled");
        let stored = store.update(loaded, 1).await.unwrap();

        let mut again = stored.clone();
        again.record_transition(IncidentStatus::Completed, "orchestrator", "nope");
        assert_eq!(
            store.update(again, stored.version).await,
            Err(StoreError::TerminalIncident(id))
        );
    }

    #[tokio::test]
    async fn test_audit_trail_may_only_grow() {
        let store = MemoryStateStore::new();
        let incident = sample_incident();
        let id = incident.id;
        store.create(incident).await.unwrap();

        let mut loaded = store.load(id).await.unwrap();
        loaded.record_transition(IncidentStatus::Enriching, "orchestrator", "started");
        store.update(loaded, 1).await.unwrap();

        let mut truncated = store.load(id).await.unwrap();
        truncated.audit_trail.clear();
        assert!(matches!(
            store.update(truncated, 2).await,
            Err(StoreError::InvariantViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = MemoryStateStore::new();
        let a = sample_incident();
        let mut b = sample_incident();
        b.record_transition(IncidentStatus::Enriching, "orchestrator", "started");

        store.create(a).await.unwrap();
        store.create(b).await.unwrap();

        assert_eq!(
            store.list_by_status(IncidentStatus::New).await.unwrap().len(),
            1
        );
        assert_eq!(
            store
                .list_by_status(IncidentStatus::Enriching)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
