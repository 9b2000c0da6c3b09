//! Incident data models for Cordon.
//!
//! This module defines the core data structures used throughout the system
//! to represent security alerts, incidents, enrichment findings, severity
//! assessments, and the per-incident audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::stage::StageKind;

/// Errors raised while validating an ingestion payload.
///
/// Validation failures are fatal: no incident record is created for a
/// malformed alert.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field was present but its value could not be accepted.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Category of an incoming alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Malware was detected on a host.
    MalwareDetected,
    /// A user reported a suspected phishing message.
    PhishingReported,
    /// An access attempt outside normal authorization.
    UnauthorizedAccess,
    /// Informational finding, no confirmed threat.
    Informational,
    /// Source-specific alert category.
    Custom(String),
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::MalwareDetected => write!(f, "malware_detected"),
            AlertKind::PhishingReported => write!(f, "phishing_reported"),
            AlertKind::UnauthorizedAccess => write!(f, "unauthorized_access"),
            AlertKind::Informational => write!(f, "informational"),
            AlertKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Type of an indicator carried by an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    /// An IPv4/IPv6 address.
    Ip,
    /// A DNS domain name.
    Domain,
    /// A file hash (MD5/SHA1/SHA256).
    FileHash,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorKind::Ip => write!(f, "ip"),
            IndicatorKind::Domain => write!(f, "domain"),
            IndicatorKind::FileHash => write!(f, "hash"),
        }
    }
}

/// A single indicator of compromise attached to an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Indicator {
    /// Indicator type.
    pub kind: IndicatorKind,
    /// Indicator value (address, domain, or hash).
    pub value: String,
}

impl Indicator {
    /// Creates a new indicator.
    pub fn new(kind: IndicatorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// An incoming security alert, captured verbatim on the incident record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Identifier assigned by the source system.
    pub alert_id: String,
    /// Alert category.
    pub kind: AlertKind,
    /// Source IP address the alert concerns.
    pub source_ip: String,
    /// Indicators of compromise carried by the alert.
    pub indicators: Vec<Indicator>,
    /// Timestamp when the alert was generated.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Validates the alert payload before an incident record is created.
    ///
    /// A malformed alert never enters the state machine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.alert_id.trim().is_empty() {
            return Err(ValidationError::MissingField("alert_id"));
        }
        if self.indicators.is_empty() {
            return Err(ValidationError::MissingField("indicators"));
        }
        if self.source_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidField {
                field: "source_ip",
                reason: format!("not a valid IP address: {:?}", self.source_ip),
            });
        }
        if self
            .indicators
            .iter()
            .any(|i| i.value.trim().is_empty())
        {
            return Err(ValidationError::InvalidField {
                field: "indicators",
                reason: "indicator value must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Severity levels assigned by triage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity, routine handling.
    Low,
    /// Medium severity.
    Medium,
    /// High severity, requires attention.
    High,
    /// Critical, immediate response required.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// The severity classification produced by the triage stage.
///
/// Set exactly once per incident; immutable thereafter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityAssessment {
    /// Severity level.
    pub level: Severity,
    /// Numeric score on a 1-10 scale.
    pub score: u8,
}

impl std::fmt::Display for SeverityAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (score {}/10)", self.level, self.score)
    }
}

/// Raised when a mutator would violate a set-once field contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldContractError {
    /// Severity has already been assessed for this incident.
    #[error("severity has already been assessed")]
    SeverityAlreadySet,

    /// A decision has already been recorded for this incident.
    #[error("decision has already been recorded")]
    DecisionAlreadySet,
}

/// Reputation verdict from threat-intelligence enrichment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reputation {
    /// Confirmed malicious.
    Malicious,
    /// Suspicious, unconfirmed.
    Suspicious,
    /// No reputation data available.
    Unknown,
}

impl std::fmt::Display for Reputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reputation::Malicious => write!(f, "malicious"),
            Reputation::Suspicious => write!(f, "suspicious"),
            Reputation::Unknown => write!(f, "unknown"),
        }
    }
}

/// A contextual finding for a single indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntelFinding {
    /// Reputation verdict.
    pub reputation: Reputation,
    /// Confidence in the verdict (0.0 - 1.0).
    pub confidence: f64,
    /// Threat category (e.g. "phishing", "c2-server").
    pub category: String,
    /// Sources that contributed to the finding.
    pub sources: Vec<String>,
    /// When the finding was gathered.
    pub observed_at: DateTime<Utc>,
}

/// Verdict recorded for a human approval decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionVerdict {
    /// Remediation was approved.
    Approved,
    /// Remediation was rejected.
    Rejected,
    /// The approval window elapsed without a decision.
    Expired,
}

impl std::fmt::Display for DecisionVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionVerdict::Approved => write!(f, "approved"),
            DecisionVerdict::Rejected => write!(f, "rejected"),
            DecisionVerdict::Expired => write!(f, "expired"),
        }
    }
}

/// The approval decision attached to a gated incident.
///
/// Set at most once, only via the approval gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    /// The verdict.
    pub verdict: DecisionVerdict,
    /// Who made the decision.
    pub decided_by: String,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Receipt produced by a completed remediation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemediationReceipt {
    /// The action that was carried out (e.g. "quarantine").
    pub action: String,
    /// Target of the action.
    pub target: String,
    /// Human-readable result summary.
    pub message: String,
    /// Steps taken by the executor, in order.
    pub steps: Vec<String>,
    /// When the action completed.
    pub completed_at: DateTime<Utc>,
}

/// Machine states of an incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Newly created, nothing has run yet.
    New,
    /// Enrichment stage in flight.
    Enriching,
    /// Enrichment complete, triage not yet started.
    Enriched,
    /// Triage stage in flight.
    Triaging,
    /// Severity assessed, routing decision pending.
    Triaged,
    /// Routed to the automatic path, remediation not yet started.
    AutoRemediating,
    /// Suspended pending a human approval decision.
    AwaitingApproval,
    /// Remediation stage in flight.
    Remediating,
    /// Remediation finished successfully. Terminal.
    Completed,
    /// A stage failed permanently or exhausted its retries. Terminal.
    Failed,
    /// Remediation was rejected by the approver. Terminal.
    Rejected,
    /// The approval window elapsed without a decision. Terminal.
    Expired,
    /// Cancelled by an operator. Terminal.
    Cancelled,
}

impl IncidentStatus {
    /// Returns true if no further transitions are permitted from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Completed
                | IncidentStatus::Failed
                | IncidentStatus::Rejected
                | IncidentStatus::Expired
                | IncidentStatus::Cancelled
        )
    }

    /// Returns true if a stage invocation is currently in flight.
    ///
    /// Cancellation is refused while a stage is running.
    pub fn is_mid_stage(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Enriching | IncidentStatus::Triaging | IncidentStatus::Remediating
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::New => write!(f, "new"),
            IncidentStatus::Enriching => write!(f, "enriching"),
            IncidentStatus::Enriched => write!(f, "enriched"),
            IncidentStatus::Triaging => write!(f, "triaging"),
            IncidentStatus::Triaged => write!(f, "triaged"),
            IncidentStatus::AutoRemediating => write!(f, "auto_remediating"),
            IncidentStatus::AwaitingApproval => write!(f, "awaiting_approval"),
            IncidentStatus::Remediating => write!(f, "remediating"),
            IncidentStatus::Completed => write!(f, "completed"),
            IncidentStatus::Failed => write!(f, "failed"),
            IncidentStatus::Rejected => write!(f, "rejected"),
            IncidentStatus::Expired => write!(f, "expired"),
            IncidentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry in the per-incident audit trail.
///
/// The trail is ordered and append-only; entries are never mutated or
/// truncated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionEvent {
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// State before the transition.
    pub from_status: IncidentStatus,
    /// State after the transition.
    pub to_status: IncidentStatus,
    /// Who drove the transition (engine component or human identity).
    pub actor: String,
    /// Human-readable context for the transition.
    pub detail: String,
}

/// A security incident: one alert's full lifecycle through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Globally unique identifier, assigned at ingestion, never reused.
    pub id: Uuid,
    /// The triggering alert, captured verbatim.
    pub raw_alert: Alert,
    /// Enrichment findings keyed by indicator value. Append-only.
    pub enrichment: BTreeMap<String, IntelFinding>,
    /// Severity classification. Set exactly once by triage.
    pub severity: Option<SeverityAssessment>,
    /// Current machine state.
    pub status: IncidentStatus,
    /// Single-use approval token. Present iff the gated path was entered.
    pub approval_token: Option<String>,
    /// Approval decision. Set at most once.
    pub decision: Option<Decision>,
    /// Remediation receipt, present once remediation has completed.
    pub remediation: Option<RemediationReceipt>,
    /// Ordered, append-only transition history.
    pub audit_trail: Vec<TransitionEvent>,
    /// Attempt-epoch counters per stage, for idempotency keys.
    pub stage_epochs: BTreeMap<StageKind, u32>,
    /// Record version for optimistic concurrency control.
    pub version: u64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Creates a new incident record from a validated alert.
    pub fn from_alert(alert: Alert) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            raw_alert: alert,
            enrichment: BTreeMap::new(),
            severity: None,
            status: IncidentStatus::New,
            approval_token: None,
            decision: None,
            remediation: None,
            audit_trail: Vec::new(),
            stage_epochs: BTreeMap::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the incident to a new status and appends the audit entry for
    /// the transition.
    ///
    /// Exactly one entry is appended per recorded transition.
    pub fn record_transition(
        &mut self,
        to: IncidentStatus,
        actor: &str,
        detail: impl Into<String>,
    ) {
        let now = Utc::now();
        self.audit_trail.push(TransitionEvent {
            timestamp: now,
            from_status: self.status,
            to_status: to,
            actor: actor.to_string(),
            detail: detail.into(),
        });
        self.status = to;
        self.updated_at = now;
    }

    /// Adds an enrichment finding for an indicator.
    ///
    /// Findings are append-only: an existing finding for the same indicator
    /// is kept and the new one is discarded.
    pub fn add_finding(&mut self, indicator: impl Into<String>, finding: IntelFinding) {
        self.enrichment.entry(indicator.into()).or_insert(finding);
        self.updated_at = Utc::now();
    }

    /// Records the severity assessment. Fails if severity was already set.
    pub fn set_severity(
        &mut self,
        assessment: SeverityAssessment,
    ) -> Result<(), FieldContractError> {
        if self.severity.is_some() {
            return Err(FieldContractError::SeverityAlreadySet);
        }
        self.severity = Some(assessment);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records the approval decision. Fails if a decision was already set.
    pub fn set_decision(
        &mut self,
        verdict: DecisionVerdict,
        decided_by: &str,
    ) -> Result<(), FieldContractError> {
        if self.decision.is_some() {
            return Err(FieldContractError::DecisionAlreadySet);
        }
        self.decision = Some(Decision {
            verdict,
            decided_by: decided_by.to_string(),
            decided_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns the next attempt epoch for a stage without persisting it.
    ///
    /// The epoch is committed together with the stage result, so a crash
    /// mid-stage re-derives the same epoch on resume and the stage can
    /// deduplicate any half-applied side effects.
    pub fn next_stage_epoch(&self, kind: StageKind) -> u32 {
        self.stage_epochs.get(&kind).copied().unwrap_or(0) + 1
    }

    /// Stores the attempt epoch consumed by a completed stage entry.
    pub fn note_stage_epoch(&mut self, kind: StageKind, epoch: u32) {
        self.stage_epochs.insert(kind, epoch);
    }

    /// Returns true if the incident is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> Alert {
        Alert {
            alert_id: "SEC-2025-001".to_string(),
            kind: AlertKind::MalwareDetected,
            source_ip: "192.168.1.100".to_string(),
            indicators: vec![Indicator::new(
                IndicatorKind::FileHash,
                "d41d8cd98f00b204e9800998ecf8427e",
            )],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_alert_validation_accepts_well_formed() {
        assert!(sample_alert().validate().is_ok());
    }

    #[test]
    fn test_alert_validation_rejects_missing_indicators() {
        let mut alert = sample_alert();
        alert.indicators.clear();
        assert_eq!(
            alert.validate(),
            Err(ValidationError::MissingField("indicators"))
        );
    }

    #[test]
    fn test_alert_validation_rejects_bad_source_ip() {
        let mut alert = sample_alert();
        alert.source_ip = "not-an-ip".to_string();
        assert!(matches!(
            alert.validate(),
            Err(ValidationError::InvalidField {
                field: "source_ip",
                ..
            })
        ));
    }

    #[test]
    fn test_incident_creation() {
        let incident = Incident::from_alert(sample_alert());
        assert_eq!(incident.status, IncidentStatus::New);
        assert!(incident.audit_trail.is_empty());
        assert!(incident.severity.is_none());
        assert!(incident.approval_token.is_none());
        assert_eq!(incident.version, 1);
    }

    #[test]
    fn test_record_transition_appends_exactly_one_entry() {
        let mut incident = Incident::from_alert(sample_alert());
        incident.record_transition(IncidentStatus::Enriching, "orchestrator", "started");
        assert_eq!(incident.status, IncidentStatus::Enriching);
        assert_eq!(incident.audit_trail.len(), 1);
        assert_eq!(incident.audit_trail[0].from_status, IncidentStatus::New);
        assert_eq!(incident.audit_trail[0].to_status, IncidentStatus::Enriching);
    }

    #[test]
    fn test_severity_set_exactly_once() {
        let mut incident = Incident::from_alert(sample_alert());
        let assessment = SeverityAssessment {
            level: Severity::High,
            score: 8,
        };
        assert!(incident.set_severity(assessment).is_ok());
        assert_eq!(
            incident.set_severity(SeverityAssessment {
                level: Severity::Low,
                score: 1,
            }),
            Err(FieldContractError::SeverityAlreadySet)
        );
        assert_eq!(incident.severity, Some(assessment));
    }

    #[test]
    fn test_decision_set_at_most_once() {
        let mut incident = Incident::from_alert(sample_alert());
        assert!(incident
            .set_decision(DecisionVerdict::Approved, "analyst@example.com")
            .is_ok());
        assert_eq!(
            incident.set_decision(DecisionVerdict::Rejected, "someone-else"),
            Err(FieldContractError::DecisionAlreadySet)
        );
        assert_eq!(
            incident.decision.as_ref().map(|d| d.verdict),
            Some(DecisionVerdict::Approved)
        );
    }

    #[test]
    fn test_findings_are_append_only() {
        let mut incident = Incident::from_alert(sample_alert());
        let first = IntelFinding {
            reputation: Reputation::Malicious,
            confidence: 0.9,
            category: "ransomware".to_string(),
            sources: vec!["intel-db".to_string()],
            observed_at: Utc::now(),
        };
        let second = IntelFinding {
            reputation: Reputation::Unknown,
            confidence: 0.0,
            category: "unknown".to_string(),
            sources: vec![],
            observed_at: Utc::now(),
        };
        incident.add_finding("10.0.0.50", first.clone());
        incident.add_finding("10.0.0.50", second);
        assert_eq!(incident.enrichment.get("10.0.0.50"), Some(&first));
    }

    #[test]
    fn test_stage_epoch_is_stable_until_noted() {
        let incident = Incident::from_alert(sample_alert());
        assert_eq!(incident.next_stage_epoch(StageKind::Enrichment), 1);
        // Unchanged until the epoch is committed with the stage result.
        assert_eq!(incident.next_stage_epoch(StageKind::Enrichment), 1);

        let mut incident = incident;
        incident.note_stage_epoch(StageKind::Enrichment, 1);
        assert_eq!(incident.next_stage_epoch(StageKind::Enrichment), 2);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_terminal_states() {
        for status in [
            IncidentStatus::Completed,
            IncidentStatus::Failed,
            IncidentStatus::Rejected,
            IncidentStatus::Expired,
            IncidentStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
        }
        assert!(!IncidentStatus::AwaitingApproval.is_terminal());
        assert!(!IncidentStatus::New.is_terminal());
    }
}
