//! # cordon-observability
//!
//! Logging, audit collection, and metrics for Cordon.
//!
//! Observability consumes the engine's event bus: the audit collector
//! materializes the transition stream for compliance queries, and the
//! metrics collector feeds the `metrics` facade.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{spawn_audit_collector, AuditLog, AuditRecord};
pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::{
    describe_metrics, spawn_metrics_collector, MetricsCollector, MetricsSnapshot,
};
