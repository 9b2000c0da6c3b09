//! Notification seam for human decision requests.
//!
//! The approval gate hands a [`DecisionRequest`] to a [`Notifier`] whenever
//! an incident suspends for human review. Delivery transport is an external
//! concern; implementations live outside the core crate. Delivery failure
//! is logged and recorded but never fails the state transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::incident::Severity;

/// Errors that can occur when delivering a decision request.
#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    /// The channel failed to deliver the message.
    #[error("failed to send notification: {0}")]
    SendFailed(String),

    /// The channel is misconfigured.
    #[error("invalid notification configuration: {0}")]
    InvalidConfig(String),

    /// The channel is rate limiting us.
    #[error("rate limited: {0}")]
    RateLimited(String),
}

/// A human-actionable decision request for a gated incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// The incident awaiting a decision.
    pub incident_id: Uuid,
    /// Assessed severity.
    pub severity: Severity,
    /// Human-readable summary of the incident and the proposed action.
    pub summary: String,
    /// Single-use token the decision system presents on callback.
    pub approval_token: String,
    /// When the request was issued.
    pub requested_at: DateTime<Utc>,
}

/// A channel that can surface a decision request to a human.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name, for logs and audit detail.
    fn name(&self) -> &str;

    /// Delivers the decision request.
    async fn notify(&self, request: &DecisionRequest) -> Result<(), NotificationError>;
}
