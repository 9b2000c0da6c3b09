//! Severity routing policy.
//!
//! The routing decision at `Triaged` is the single authorization checkpoint
//! in the engine: it is evaluated exactly once per incident and its verdict
//! is recorded in the audit trail before any remediation stage runs. The
//! mapping is a pure, injectable policy so thresholds can be tested
//! independently and reconfigured without touching the state machine.

use serde::{Deserialize, Serialize};

use crate::incident::{Severity, SeverityAssessment};

/// Which remediation path an incident takes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    /// Remediation runs immediately, no human in the loop.
    AutoRemediate,
    /// The incident suspends until a human approves remediation.
    RequireApproval,
}

impl std::fmt::Display for RoutePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePath::AutoRemediate => write!(f, "automatic remediation"),
            RoutePath::RequireApproval => write!(f, "human approval required"),
        }
    }
}

/// A pure severity-to-path mapping.
pub trait RoutingPolicy: Send + Sync {
    /// Routes an assessed incident to its remediation path.
    fn route(&self, assessment: &SeverityAssessment) -> RoutePath;
}

/// Threshold-based routing: severities at or above the threshold require
/// human approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityRouting {
    /// Lowest severity that is gated behind human approval.
    pub approval_threshold: Severity,
}

impl Default for SeverityRouting {
    fn default() -> Self {
        Self {
            approval_threshold: Severity::High,
        }
    }
}

impl RoutingPolicy for SeverityRouting {
    fn route(&self, assessment: &SeverityAssessment) -> RoutePath {
        if assessment.level >= self.approval_threshold {
            RoutePath::RequireApproval
        } else {
            RoutePath::AutoRemediate
        }
    }
}
