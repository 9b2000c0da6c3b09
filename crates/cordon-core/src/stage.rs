//! Stage contract for Cordon.
//!
//! Enrichment, triage, and remediation are black-box collaborators behind a
//! uniform interface: a stage receives an incident record snapshot plus an
//! idempotency key and returns either an updated record or a classified
//! failure. Implementations are selected by configuration through the
//! [`StageRegistry`].
//!
//! Stages are not required to be deterministic, but they MUST be idempotent
//! under retry: re-invoking a stage with the same idempotency key must not
//! duplicate its side effects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::incident::Incident;

/// The processing stages an incident passes through.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Threat-intelligence enrichment.
    Enrichment,
    /// Severity classification.
    Triage,
    /// Response-action execution.
    Remediation,
}

impl StageKind {
    /// Stable string form, used in idempotency keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Enrichment => "enrichment",
            StageKind::Triage => "triage",
            StageKind::Remediation => "remediation",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified stage failure.
///
/// The orchestrator never inspects failure detail beyond this classification
/// and the human-readable message persisted to the audit trail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    /// Recoverable failure (timeout, rate limit, upstream blip). Retried
    /// with backoff up to the configured attempt budget.
    #[error("transient stage failure: {0}")]
    Transient(String),

    /// Unrecoverable failure (malformed input, contract violation). Never
    /// retried; the incident fails immediately.
    #[error("permanent stage failure: {0}")]
    Permanent(String),
}

/// Outcome classification for a stage invocation, including retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage returned an updated record.
    Success,
    /// The stage kept failing transiently until the attempt budget ran out.
    TransientFailure,
    /// The stage failed permanently.
    PermanentFailure,
}

/// Stable identifier passed to every stage invocation so repeated attempts
/// can be deduplicated by the stage.
///
/// The key is identical across retry attempts of one stage entry; the epoch
/// advances only when the orchestrator re-enters the stage fresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// The incident being processed.
    pub incident_id: Uuid,
    /// The stage being invoked.
    pub stage: StageKind,
    /// Attempt epoch for this stage entry.
    pub epoch: u32,
}

impl IdempotencyKey {
    /// Creates a key for a stage entry.
    pub fn new(incident_id: Uuid, stage: StageKind, epoch: u32) -> Self {
        Self {
            incident_id,
            stage,
            epoch,
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.incident_id, self.stage, self.epoch)
    }
}

/// A processing stage: a function of (incident record) to (updated record
/// or classified failure).
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which stage slot this implementation fills.
    fn kind(&self) -> StageKind;

    /// Processes an incident record snapshot.
    ///
    /// Implementations classify their own failures; the idempotency key is
    /// the implementation's handle for deduplicating side effects across
    /// retries.
    async fn execute(
        &self,
        incident: Incident,
        key: &IdempotencyKey,
    ) -> Result<Incident, StageFailure>;
}

/// Registry mapping stage slots to their configured implementations.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<StageKind, Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage implementation for its slot, replacing any
    /// previous registration.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.kind(), stage);
    }

    /// Looks up the implementation for a stage slot.
    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn Stage>> {
        self.stages.get(&kind).cloned()
    }

    /// Returns the registered stage slots.
    pub fn registered(&self) -> Vec<StageKind> {
        let mut kinds: Vec<StageKind> = self.stages.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PassthroughStage(StageKind);

    #[async_trait]
    impl Stage for PassthroughStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn execute(
            &self,
            incident: Incident,
            _key: &IdempotencyKey,
        ) -> Result<Incident, StageFailure> {
            Ok(incident)
        }
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut registry = StageRegistry::new();
        registry.register(Arc::new(PassthroughStage(StageKind::Enrichment)));
        registry.register(Arc::new(PassthroughStage(StageKind::Triage)));

        assert!(registry.get(StageKind::Enrichment).is_some());
        assert!(registry.get(StageKind::Remediation).is_none());
        assert_eq!(
            registry.registered(),
            vec![StageKind::Enrichment, StageKind::Triage]
        );
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = Uuid::new_v4();
        let key = IdempotencyKey::new(id, StageKind::Remediation, 2);
        assert_eq!(key.to_string(), format!("{}:remediation:2", id));
    }
}
