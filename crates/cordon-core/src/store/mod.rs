//! Durable state persistence for incident records.
//!
//! One record per incident, keyed by incident id, carrying the full data
//! model plus a monotonically increasing version number. Writes go through
//! optimistic concurrency: an update is applied only if the caller saw the
//! current version, otherwise the attempt is rejected and retried against
//! fresh state by the orchestrator.

mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::incident::{Incident, IncidentStatus};

/// Errors raised by the state store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists for the incident id.
    #[error("incident not found: {0}")]
    NotFound(Uuid),

    /// A record already exists for the incident id. Ids are never reused.
    #[error("incident already exists: {0}")]
    AlreadyExists(Uuid),

    /// The record changed since the caller loaded it.
    #[error("version conflict for incident {id}: expected {expected}, stored {actual}")]
    VersionConflict {
        /// The incident that was being written.
        id: Uuid,
        /// The version the caller expected.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// The record is in a terminal state; no further writes are permitted.
    #[error("incident {0} is terminal and cannot be modified")]
    TerminalIncident(Uuid),

    /// An invariant of the record would be violated by the write.
    #[error("invariant violation for incident {id}: {reason}")]
    InvariantViolation {
        /// The incident that was being written.
        id: Uuid,
        /// Which invariant the write would have broken.
        reason: String,
    },

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable key-value persistence for incident records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Creates a new record. Fails if the id already exists.
    async fn create(&self, incident: Incident) -> Result<(), StoreError>;

    /// Loads the current record for an incident.
    async fn load(&self, id: Uuid) -> Result<Incident, StoreError>;

    /// Writes an updated record if the stored version matches
    /// `expected_version`, bumping the version on success.
    ///
    /// Returns the stored record. Terminal records reject all writes; the
    /// audit trail may only grow.
    async fn update(
        &self,
        incident: Incident,
        expected_version: u64,
    ) -> Result<Incident, StoreError>;

    /// Lists all records.
    async fn list(&self) -> Result<Vec<Incident>, StoreError>;

    /// Lists records currently in the given status.
    async fn list_by_status(&self, status: IncidentStatus) -> Result<Vec<Incident>, StoreError>;
}
