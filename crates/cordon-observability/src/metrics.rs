//! Metrics collection for Cordon.
//!
//! Feeds engine events into the `metrics` facade (for Prometheus export or
//! whatever recorder the host installs) and keeps a queryable snapshot of
//! the headline counters.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use cordon_core::EngineEvent;

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "cordon_incidents_created_total",
        "Incident records created from validated alerts"
    );
    describe_counter!(
        "cordon_transitions_total",
        "State transitions recorded, labeled by target state"
    );
    describe_counter!(
        "cordon_stage_retries_total",
        "Stage retries after transient failures, labeled by stage"
    );
    describe_counter!(
        "cordon_stage_failures_total",
        "Stage entries that escalated to the failure branch, labeled by stage"
    );
    describe_counter!(
        "cordon_approvals_requested_total",
        "Human approval requests issued"
    );
    describe_counter!(
        "cordon_approvals_resolved_total",
        "Approval decisions applied, labeled by verdict"
    );
    describe_counter!(
        "cordon_notifications_failed_total",
        "Decision-request deliveries that failed"
    );
    describe_counter!(
        "cordon_incidents_cancelled_total",
        "Incidents cancelled by operators"
    );
    describe_histogram!(
        "cordon_stage_attempts",
        "Attempts needed per successful stage entry, labeled by stage"
    );
}

/// Snapshot of the headline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Incident records created.
    pub incidents_created: u64,
    /// State transitions recorded.
    pub transitions: u64,
    /// Stage retries after transient failures.
    pub stage_retries: u64,
    /// Stage entries that escalated to failure.
    pub stage_failures: u64,
    /// Approval requests issued.
    pub approvals_requested: u64,
    /// Approval decisions applied.
    pub approvals_resolved: u64,
    /// Failed decision-request deliveries.
    pub notifications_failed: u64,
    /// Cancelled incidents.
    pub incidents_cancelled: u64,
}

/// Collects engine events into metrics.
#[derive(Default)]
pub struct MetricsCollector {
    incidents_created: AtomicU64,
    transitions: AtomicU64,
    stage_retries: AtomicU64,
    stage_failures: AtomicU64,
    approvals_requested: AtomicU64,
    approvals_resolved: AtomicU64,
    notifications_failed: AtomicU64,
    incidents_cancelled: AtomicU64,
}

impl MetricsCollector {
    /// Creates a collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of the headline counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            incidents_created: self.incidents_created.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            stage_retries: self.stage_retries.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            approvals_requested: self.approvals_requested.load(Ordering::Relaxed),
            approvals_resolved: self.approvals_resolved.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            incidents_cancelled: self.incidents_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Applies one event to the counters and the metrics facade.
    pub fn observe(&self, event: &EngineEvent) {
        match event {
            EngineEvent::IncidentCreated { .. } => {
                self.incidents_created.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_incidents_created_total").increment(1);
            }
            EngineEvent::TransitionRecorded { to_status, .. } => {
                self.transitions.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_transitions_total", "to" => to_status.to_string()).increment(1);
            }
            EngineEvent::StageRetried { stage, .. } => {
                self.stage_retries.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_stage_retries_total", "stage" => stage.to_string()).increment(1);
            }
            EngineEvent::StageCompleted { stage, attempts, .. } => {
                histogram!("cordon_stage_attempts", "stage" => stage.to_string())
                    .record(*attempts as f64);
            }
            EngineEvent::StageFailed { stage, .. } => {
                self.stage_failures.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_stage_failures_total", "stage" => stage.to_string()).increment(1);
            }
            EngineEvent::ApprovalRequested { .. } => {
                self.approvals_requested.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_approvals_requested_total").increment(1);
            }
            EngineEvent::ApprovalResolved { verdict, .. } => {
                self.approvals_resolved.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_approvals_resolved_total", "verdict" => verdict.to_string())
                    .increment(1);
            }
            EngineEvent::NotificationFailed { .. } => {
                self.notifications_failed.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_notifications_failed_total").increment(1);
            }
            EngineEvent::IncidentCancelled { .. } => {
                self.incidents_cancelled.fetch_add(1, Ordering::Relaxed);
                counter!("cordon_incidents_cancelled_total").increment(1);
            }
            EngineEvent::StageStarted { .. } => {}
        }
    }
}

/// Spawns a task that feeds bus events into the collector.
pub fn spawn_metrics_collector(
    collector: Arc<MetricsCollector>,
    mut receiver: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => collector.observe(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "metrics collector lagged; dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
