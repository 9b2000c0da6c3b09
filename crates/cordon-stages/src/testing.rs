//! Test harness for stage and pipeline tests.
//!
//! Provides sample alerts and scripted stage stubs used by unit and
//! integration tests across the workspace.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use cordon_core::{
    Alert, AlertKind, IdempotencyKey, Incident, Indicator, IndicatorKind, Stage, StageFailure,
    StageKind,
};

/// Creates a benign alert whose indicators have no intel entries.
pub fn benign_alert(alert_id: &str) -> Alert {
    Alert {
        alert_id: alert_id.to_string(),
        kind: AlertKind::Informational,
        source_ip: "203.0.113.10".to_string(),
        indicators: vec![Indicator::new(IndicatorKind::Domain, "docs.example.com")],
        timestamp: Utc::now(),
    }
}

/// Creates a malware alert whose indicators score high against the bundled
/// intel table.
pub fn malware_alert(alert_id: &str) -> Alert {
    Alert {
        alert_id: alert_id.to_string(),
        kind: AlertKind::MalwareDetected,
        source_ip: "10.0.0.50".to_string(),
        indicators: vec![Indicator::new(
            IndicatorKind::FileHash,
            "d41d8cd98f00b204e9800998ecf8427e",
        )],
        timestamp: Utc::now(),
    }
}

/// A stage stub that replays a script of failures before succeeding,
/// recording every invocation and the key it was given.
pub struct ScriptedStage {
    kind: StageKind,
    script: Mutex<VecDeque<StageFailure>>,
    calls: AtomicU32,
    keys: Mutex<Vec<String>>,
}

impl ScriptedStage {
    /// A stub for `kind` that fails with `failures` in order, then passes
    /// the record through unchanged.
    pub fn new(kind: StageKind, failures: Vec<StageFailure>) -> Self {
        Self {
            kind,
            script: Mutex::new(failures.into()),
            calls: AtomicU32::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// A stub that fails transiently `n` times, then succeeds.
    pub fn transient_then_success(kind: StageKind, n: usize) -> Self {
        Self::new(
            kind,
            std::iter::repeat_with(|| {
                StageFailure::Transient("upstream unavailable".to_string())
            })
            .take(n)
            .collect(),
        )
    }

    /// Total invocation attempts observed.
    pub fn invocations(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Distinct idempotency keys observed.
    pub fn distinct_keys(&self) -> usize {
        let mut keys = self.keys.lock().unwrap().clone();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(
        &self,
        incident: Incident,
        key: &IdempotencyKey,
    ) -> Result<Incident, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(key.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(incident),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stage_replays_failures_in_order() {
        let stage = ScriptedStage::transient_then_success(StageKind::Enrichment, 2);
        let incident = Incident::from_alert(benign_alert("a-1"));
        let key = IdempotencyKey::new(incident.id, StageKind::Enrichment, 1);

        assert!(stage.execute(incident.clone(), &key).await.is_err());
        assert!(stage.execute(incident.clone(), &key).await.is_err());
        assert!(stage.execute(incident, &key).await.is_ok());
        assert_eq!(stage.invocations(), 3);
        assert_eq!(stage.distinct_keys(), 1);
    }
}
