//! Severity triage stage.
//!
//! Scores the incident from its enrichment findings and assigns the
//! severity classification exactly once. The worst finding dominates:
//! confirmed-malicious reputation weighs 50, suspicious 30, plus the
//! provider's confidence weighted by 30. Raw scores of 80/60/40 bound the
//! critical/high/medium bands; everything below is low.

use async_trait::async_trait;
use tracing::debug;

use cordon_core::{
    IdempotencyKey, Incident, IntelFinding, Reputation, Severity, SeverityAssessment, Stage,
    StageFailure, StageKind,
};

const MALICIOUS_WEIGHT: f64 = 50.0;
const SUSPICIOUS_WEIGHT: f64 = 30.0;
const CONFIDENCE_WEIGHT: f64 = 30.0;

const CRITICAL_THRESHOLD: f64 = 80.0;
const HIGH_THRESHOLD: f64 = 60.0;
const MEDIUM_THRESHOLD: f64 = 40.0;

/// The triage stage.
#[derive(Default)]
pub struct TriageStage;

impl TriageStage {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }

    fn finding_score(finding: &IntelFinding) -> f64 {
        let base = match finding.reputation {
            Reputation::Malicious => MALICIOUS_WEIGHT,
            Reputation::Suspicious => SUSPICIOUS_WEIGHT,
            Reputation::Unknown => 0.0,
        };
        base + finding.confidence * CONFIDENCE_WEIGHT
    }

    /// Raw score for an incident: the worst finding wins.
    fn raw_score(incident: &Incident) -> f64 {
        incident
            .enrichment
            .values()
            .map(Self::finding_score)
            .fold(0.0, f64::max)
    }

    fn classify(raw: f64) -> Severity {
        if raw >= CRITICAL_THRESHOLD {
            Severity::Critical
        } else if raw >= HIGH_THRESHOLD {
            Severity::High
        } else if raw >= MEDIUM_THRESHOLD {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Maps a raw score onto the 1-10 scale.
    fn scale(raw: f64) -> u8 {
        (raw / 10.0).round().clamp(1.0, 10.0) as u8
    }
}

#[async_trait]
impl Stage for TriageStage {
    fn kind(&self) -> StageKind {
        StageKind::Triage
    }

    async fn execute(
        &self,
        mut incident: Incident,
        key: &IdempotencyKey,
    ) -> Result<Incident, StageFailure> {
        let raw = Self::raw_score(&incident);
        let assessment = SeverityAssessment {
            level: Self::classify(raw),
            score: Self::scale(raw),
        };
        debug!(
            key = %key,
            raw_score = raw,
            severity = %assessment.level,
            score = assessment.score,
            "severity assessed"
        );

        incident
            .set_severity(assessment)
            .map_err(|e| StageFailure::Permanent(e.to_string()))?;
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cordon_core::{Alert, AlertKind, Indicator, IndicatorKind};

    fn incident_with(findings: &[(&str, Reputation, f64)]) -> Incident {
        let mut incident = Incident::from_alert(Alert {
            alert_id: "SEC-2025-001".to_string(),
            kind: AlertKind::MalwareDetected,
            source_ip: "203.0.113.10".to_string(),
            indicators: vec![Indicator::new(IndicatorKind::Domain, "example.com")],
            timestamp: Utc::now(),
        });
        for (indicator, reputation, confidence) in findings {
            incident.add_finding(
                indicator.to_string(),
                IntelFinding {
                    reputation: *reputation,
                    confidence: *confidence,
                    category: "test".to_string(),
                    sources: vec![],
                    observed_at: Utc::now(),
                },
            );
        }
        incident
    }

    async fn triage(incident: Incident) -> Incident {
        let key = IdempotencyKey::new(incident.id, StageKind::Triage, 1);
        TriageStage::new().execute(incident, &key).await.unwrap()
    }

    #[tokio::test]
    async fn test_no_findings_is_low() {
        let triaged = triage(incident_with(&[])).await;
        let assessment = triaged.severity.unwrap();
        assert_eq!(assessment.level, Severity::Low);
        assert_eq!(assessment.score, 1);
    }

    #[tokio::test]
    async fn test_suspicious_finding_is_medium() {
        // 30 + 0.65 * 30 = 49.5
        let triaged = triage(incident_with(&[("x", Reputation::Suspicious, 0.65)])).await;
        let assessment = triaged.severity.unwrap();
        assert_eq!(assessment.level, Severity::Medium);
        assert_eq!(assessment.score, 5);
    }

    #[tokio::test]
    async fn test_malicious_finding_is_high() {
        // 50 + 0.88 * 30 = 76.4
        let triaged = triage(incident_with(&[("x", Reputation::Malicious, 0.88)])).await;
        let assessment = triaged.severity.unwrap();
        assert_eq!(assessment.level, Severity::High);
        assert_eq!(assessment.score, 8);
    }

    #[tokio::test]
    async fn test_certain_malicious_finding_is_critical() {
        // 50 + 1.0 * 30 = 80
        let triaged = triage(incident_with(&[("x", Reputation::Malicious, 1.0)])).await;
        assert_eq!(triaged.severity.unwrap().level, Severity::Critical);
    }

    #[tokio::test]
    async fn test_worst_finding_dominates() {
        let triaged = triage(incident_with(&[
            ("benign", Reputation::Unknown, 0.0),
            ("bad", Reputation::Malicious, 0.92),
            ("meh", Reputation::Suspicious, 0.4),
        ]))
        .await;
        // 50 + 0.92 * 30 = 77.6
        assert_eq!(triaged.severity.unwrap().level, Severity::High);
    }

    #[tokio::test]
    async fn test_reclassification_is_refused() {
        let mut incident = incident_with(&[]);
        incident
            .set_severity(SeverityAssessment {
                level: Severity::High,
                score: 8,
            })
            .unwrap();

        let key = IdempotencyKey::new(incident.id, StageKind::Triage, 1);
        assert!(matches!(
            TriageStage::new().execute(incident, &key).await,
            Err(StageFailure::Permanent(_))
        ));
    }
}
