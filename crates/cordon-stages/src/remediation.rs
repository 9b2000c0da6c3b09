//! Remediation stage: quarantine of the offending source.
//!
//! The concrete action runs behind the [`RemediationExecutor`] seam; the
//! bundled [`SimulatedExecutor`] walks the same console steps a browser
//! automation would and records a receipt. Executors deduplicate by
//! idempotency key: a retried invocation never quarantines the same
//! target twice.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use cordon_core::{
    IdempotencyKey, Incident, RemediationReceipt, Stage, StageFailure, StageKind,
};

/// Errors raised by remediation executors.
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    /// The control surface could not be reached. Retried as transient.
    #[error("executor unreachable: {0}")]
    Unreachable(String),

    /// The control surface refused the action. Never retried.
    #[error("action rejected: {0}")]
    Rejected(String),
}

/// A system that can carry out containment actions.
#[async_trait]
pub trait RemediationExecutor: Send + Sync {
    /// Executor name, for logs.
    fn name(&self) -> &str;

    /// Quarantines a target, deduplicating by idempotency key.
    async fn quarantine(
        &self,
        target: &str,
        reason: &str,
        key: &IdempotencyKey,
    ) -> Result<RemediationReceipt, ExecutorError>;
}

/// In-process executor that simulates the firewall console walk.
#[derive(Default)]
pub struct SimulatedExecutor {
    applied: Mutex<HashMap<String, RemediationReceipt>>,
}

impl SimulatedExecutor {
    /// Creates the executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct quarantines actually applied.
    pub async fn distinct_effects(&self) -> usize {
        self.applied.lock().await.len()
    }
}

#[async_trait]
impl RemediationExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated-executor"
    }

    async fn quarantine(
        &self,
        target: &str,
        reason: &str,
        key: &IdempotencyKey,
    ) -> Result<RemediationReceipt, ExecutorError> {
        let mut applied = self.applied.lock().await;
        if let Some(receipt) = applied.get(&key.to_string()) {
            debug!(key = %key, target, "quarantine already applied; returning recorded receipt");
            return Ok(receipt.clone());
        }

        let receipt = RemediationReceipt {
            action: "quarantine".to_string(),
            target: target.to_string(),
            message: format!("quarantined {}: {}", target, reason),
            steps: vec![
                "navigated to firewall console".to_string(),
                format!("added {} to blocklist", target),
                "saved configuration".to_string(),
                format!("verified {} is blocked", target),
            ],
            completed_at: Utc::now(),
        };
        applied.insert(key.to_string(), receipt.clone());
        info!(key = %key, target, "quarantine applied");
        Ok(receipt)
    }
}

/// The remediation stage.
pub struct RemediationStage {
    executor: Arc<dyn RemediationExecutor>,
}

impl RemediationStage {
    /// Creates the stage over an executor.
    pub fn new(executor: Arc<dyn RemediationExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Stage for RemediationStage {
    fn kind(&self) -> StageKind {
        StageKind::Remediation
    }

    async fn execute(
        &self,
        mut incident: Incident,
        key: &IdempotencyKey,
    ) -> Result<Incident, StageFailure> {
        let target = incident.raw_alert.source_ip.clone();
        let severity = incident
            .severity
            .map(|a| a.level.to_string())
            .unwrap_or_else(|| "unclassified".to_string());
        let reason = format!(
            "{} alert {} classified {}",
            incident.raw_alert.kind, incident.raw_alert.alert_id, severity
        );

        let receipt = self
            .executor
            .quarantine(&target, &reason, key)
            .await
            .map_err(|e| match e {
                ExecutorError::Unreachable(msg) => StageFailure::Transient(msg),
                ExecutorError::Rejected(msg) => StageFailure::Permanent(msg),
            })?;

        incident.remediation = Some(receipt);
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cordon_core::{Alert, AlertKind, Indicator, IndicatorKind, Severity, SeverityAssessment};

    fn incident() -> Incident {
        let mut incident = Incident::from_alert(Alert {
            alert_id: "SEC-2025-001".to_string(),
            kind: AlertKind::MalwareDetected,
            source_ip: "10.0.0.50".to_string(),
            indicators: vec![Indicator::new(IndicatorKind::Ip, "10.0.0.50")],
            timestamp: Utc::now(),
        });
        incident
            .set_severity(SeverityAssessment {
                level: Severity::High,
                score: 8,
            })
            .unwrap();
        incident
    }

    #[tokio::test]
    async fn test_quarantine_records_receipt() {
        let executor = Arc::new(SimulatedExecutor::new());
        let stage = RemediationStage::new(Arc::clone(&executor) as Arc<dyn RemediationExecutor>);
        let incident = incident();
        let key = IdempotencyKey::new(incident.id, StageKind::Remediation, 1);

        let remediated = stage.execute(incident, &key).await.unwrap();
        let receipt = remediated.remediation.unwrap();
        assert_eq!(receipt.action, "quarantine");
        assert_eq!(receipt.target, "10.0.0.50");
        assert_eq!(receipt.steps.len(), 4);
        assert_eq!(executor.distinct_effects().await, 1);
    }

    #[tokio::test]
    async fn test_same_key_never_duplicates_the_effect() {
        let executor = Arc::new(SimulatedExecutor::new());
        let stage = RemediationStage::new(Arc::clone(&executor) as Arc<dyn RemediationExecutor>);
        let incident = incident();
        let key = IdempotencyKey::new(incident.id, StageKind::Remediation, 1);

        let first = stage.execute(incident.clone(), &key).await.unwrap();
        let second = stage.execute(incident, &key).await.unwrap();

        assert_eq!(executor.distinct_effects().await, 1);
        assert_eq!(
            first.remediation.unwrap().completed_at,
            second.remediation.unwrap().completed_at
        );
    }

    #[tokio::test]
    async fn test_distinct_keys_are_distinct_effects() {
        let executor = Arc::new(SimulatedExecutor::new());
        let stage = RemediationStage::new(Arc::clone(&executor) as Arc<dyn RemediationExecutor>);

        let a = incident();
        let b = incident();
        stage
            .execute(a.clone(), &IdempotencyKey::new(a.id, StageKind::Remediation, 1))
            .await
            .unwrap();
        stage
            .execute(b.clone(), &IdempotencyKey::new(b.id, StageKind::Remediation, 1))
            .await
            .unwrap();

        assert_eq!(executor.distinct_effects().await, 2);
    }

    #[tokio::test]
    async fn test_executor_errors_are_classified() {
        struct RefusingExecutor;

        #[async_trait]
        impl RemediationExecutor for RefusingExecutor {
            fn name(&self) -> &str {
                "refusing"
            }

            async fn quarantine(
                &self,
                _target: &str,
                _reason: &str,
                _key: &IdempotencyKey,
            ) -> Result<RemediationReceipt, ExecutorError> {
                Err(ExecutorError::Rejected("target is on the allow list".to_string()))
            }
        }

        let stage = RemediationStage::new(Arc::new(RefusingExecutor));
        let incident = incident();
        let key = IdempotencyKey::new(incident.id, StageKind::Remediation, 1);
        assert!(matches!(
            stage.execute(incident, &key).await,
            Err(StageFailure::Permanent(_))
        ));
    }
}
