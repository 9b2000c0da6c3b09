//! Threat-intelligence enrichment stage.
//!
//! Looks up every indicator carried by the alert (plus its source IP) and
//! attaches the findings to the incident record. The intelligence source
//! is behind the [`IntelProvider`] seam; the bundled [`StaticIntelTable`]
//! serves fixed demo data and is the default for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use cordon_core::{
    IdempotencyKey, Incident, IndicatorKind, IntelFinding, Reputation, Stage, StageFailure,
    StageKind,
};

/// Errors raised by intelligence providers.
#[derive(Error, Debug, Clone)]
pub enum IntelError {
    /// The intelligence source could not be reached. Retried as transient.
    #[error("intel source unavailable: {0}")]
    Unavailable(String),
}

/// A threat-intelligence source.
#[async_trait]
pub trait IntelProvider: Send + Sync {
    /// Provider name, recorded on findings.
    fn name(&self) -> &str;

    /// Looks up one indicator. Unknown indicators yield an `Unknown`
    /// finding rather than an error.
    async fn lookup(&self, kind: IndicatorKind, value: &str) -> Result<IntelFinding, IntelError>;
}

/// Fixed in-memory intelligence table.
pub struct StaticIntelTable {
    entries: HashMap<(IndicatorKind, String), (Reputation, f64, &'static str)>,
}

impl StaticIntelTable {
    /// Builds the table with its bundled demo entries.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            (IndicatorKind::Ip, "192.168.1.100".to_string()),
            (Reputation::Suspicious, 0.65, "c2-server"),
        );
        entries.insert(
            (IndicatorKind::Ip, "10.0.0.50".to_string()),
            (Reputation::Malicious, 0.92, "malware-host"),
        );
        entries.insert(
            (IndicatorKind::Domain, "malicious-site.com".to_string()),
            (Reputation::Malicious, 0.98, "phishing"),
        );
        entries.insert(
            (
                IndicatorKind::FileHash,
                "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            ),
            (Reputation::Malicious, 0.88, "ransomware"),
        );
        Self { entries }
    }
}

impl Default for StaticIntelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntelProvider for StaticIntelTable {
    fn name(&self) -> &str {
        "static-intel-table"
    }

    async fn lookup(&self, kind: IndicatorKind, value: &str) -> Result<IntelFinding, IntelError> {
        let (reputation, confidence, category) = self
            .entries
            .get(&(kind, value.to_string()))
            .copied()
            .unwrap_or((Reputation::Unknown, 0.0, "unknown"));

        Ok(IntelFinding {
            reputation,
            confidence,
            category: category.to_string(),
            sources: vec![self.name().to_string()],
            observed_at: Utc::now(),
        })
    }
}

/// The enrichment stage.
pub struct EnrichmentStage {
    provider: Arc<dyn IntelProvider>,
}

impl EnrichmentStage {
    /// Creates the stage over an intelligence provider.
    pub fn new(provider: Arc<dyn IntelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for EnrichmentStage {
    fn kind(&self) -> StageKind {
        StageKind::Enrichment
    }

    async fn execute(
        &self,
        mut incident: Incident,
        key: &IdempotencyKey,
    ) -> Result<Incident, StageFailure> {
        let mut targets: Vec<(IndicatorKind, String)> = vec![(
            IndicatorKind::Ip,
            incident.raw_alert.source_ip.clone(),
        )];
        for indicator in &incident.raw_alert.indicators {
            targets.push((indicator.kind, indicator.value.clone()));
        }

        for (kind, value) in targets {
            if incident.enrichment.contains_key(&value) {
                continue;
            }
            let finding = self
                .provider
                .lookup(kind, &value)
                .await
                .map_err(|e| match e {
                    IntelError::Unavailable(msg) => StageFailure::Transient(msg),
                })?;
            debug!(
                key = %key,
                indicator = %value,
                reputation = %finding.reputation,
                "indicator enriched"
            );
            incident.add_finding(value, finding);
        }

        Ok(incident)
    }
}
