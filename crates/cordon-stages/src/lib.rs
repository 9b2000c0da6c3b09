//! # cordon-stages
//!
//! Stage implementations for Cordon: threat-intelligence enrichment,
//! severity triage, and quarantine remediation, each behind the seam that
//! keeps the real external integration swappable.

pub mod enrichment;
pub mod remediation;
pub mod testing;
pub mod triage;

pub use enrichment::{EnrichmentStage, IntelError, IntelProvider, StaticIntelTable};
pub use remediation::{
    ExecutorError, RemediationExecutor, RemediationStage, SimulatedExecutor,
};
pub use triage::TriageStage;

use std::sync::Arc;

use cordon_core::StageRegistry;

/// Builds a registry over explicit provider and executor implementations.
pub fn registry_with(
    provider: Arc<dyn IntelProvider>,
    executor: Arc<dyn RemediationExecutor>,
) -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry.register(Arc::new(EnrichmentStage::new(provider)));
    registry.register(Arc::new(TriageStage::new()));
    registry.register(Arc::new(RemediationStage::new(executor)));
    registry
}

/// Builds the default registry: static intel table, simulated executor.
pub fn default_registry() -> StageRegistry {
    registry_with(
        Arc::new(StaticIntelTable::new()),
        Arc::new(SimulatedExecutor::new()),
    )
}
