//! Approval gate: the suspend/resume boundary for human-in-the-loop review.
//!
//! When routing sends an incident down the gated path, the gate issues a
//! single-use, unguessable token bound to the incident, notifies the
//! decision channel, and waits — as persisted state, not a blocked task —
//! for the external decision system to call back with the token. The first
//! resolution wins; every later attempt with the same token is refused
//! without touching incident state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{EngineEvent, EventBus};
use crate::incident::Severity;
use crate::notifier::{DecisionRequest, Notifier};

/// Length of generated approval tokens.
const TOKEN_LEN: usize = 32;

/// The decision an external approver can return through the callback.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Proceed with remediation.
    Approved,
    /// Terminate the incident without remediation.
    Rejected,
}

/// Errors surfaced to approval callers.
///
/// None of these mutate incident state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not recognized (never issued, or invalidated).
    #[error("approval token is not recognized")]
    Invalid,

    /// The token was already consumed by an earlier resolution.
    #[error("approval token has already been used")]
    AlreadyUsed,

    /// The approval window elapsed before a decision was made.
    #[error("approval token expired before a decision was made")]
    Expired,

    /// The incident bound to the token is not awaiting approval.
    #[error("incident {0} is not awaiting approval")]
    NotAwaitingApproval(Uuid),
}

/// Lifecycle of an issued token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    /// Awaiting a decision.
    Pending,
    /// Consumed by a resolution. Single-use: no further resolutions.
    Consumed,
    /// The approval window elapsed.
    Expired,
    /// Invalidated by cancellation.
    Invalidated,
}

/// An issued approval ticket, bound to one incident.
#[derive(Debug, Clone)]
pub struct ApprovalTicket {
    /// The single-use token.
    pub token: String,
    /// The incident awaiting the decision.
    pub incident_id: Uuid,
    /// Assessed severity, carried into the notification.
    pub severity: Severity,
    /// Human-readable summary for the decision request.
    pub summary: String,
    /// When the ticket was issued.
    pub issued_at: DateTime<Utc>,
    /// Deadline for a decision, if an expiry is configured.
    pub expires_at: Option<DateTime<Utc>>,
    state: TicketState,
}

impl ApprovalTicket {
    fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }
}

/// Manages approval tokens and decision-request delivery.
pub struct ApprovalGate {
    tickets: RwLock<HashMap<String, ApprovalTicket>>,
    notifier: Arc<dyn Notifier>,
    expiry: Option<ChronoDuration>,
    bus: Arc<EventBus>,
}

impl ApprovalGate {
    /// Creates a gate.
    ///
    /// `expiry` bounds the approval wait; `None` means decisions are
    /// awaited indefinitely.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        expiry: Option<Duration>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            notifier,
            expiry: expiry.and_then(|d| ChronoDuration::from_std(d).ok()),
            bus,
        }
    }

    /// Generates an unguessable single-use token.
    fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    /// Issues a pending ticket for an incident.
    ///
    /// The token is returned to the orchestrator for persisting on the
    /// incident record before any notification goes out.
    pub async fn issue(
        &self,
        incident_id: Uuid,
        severity: Severity,
        summary: impl Into<String>,
    ) -> ApprovalTicket {
        let now = Utc::now();
        let ticket = ApprovalTicket {
            token: Self::generate_token(),
            incident_id,
            severity,
            summary: summary.into(),
            issued_at: now,
            expires_at: self.expiry.map(|d| now + d),
            state: TicketState::Pending,
        };

        let mut tickets = self.tickets.write().await;
        tickets.insert(ticket.token.clone(), ticket.clone());

        info!(
            incident_id = %incident_id,
            severity = %severity,
            expires_at = ?ticket.expires_at,
            "approval ticket issued"
        );
        ticket
    }

    /// Discards a ticket whose suspension was never committed.
    pub async fn discard(&self, token: &str) {
        self.tickets.write().await.remove(token);
    }

    /// Re-registers a ticket from a persisted record, e.g. after a restart.
    ///
    /// Keeps the original token so outstanding decision links stay valid.
    /// No-op if the token is already tracked.
    pub async fn adopt(
        &self,
        token: &str,
        incident_id: Uuid,
        severity: Severity,
        summary: impl Into<String>,
    ) {
        let mut tickets = self.tickets.write().await;
        tickets.entry(token.to_string()).or_insert_with(|| {
            let now = Utc::now();
            ApprovalTicket {
                token: token.to_string(),
                incident_id,
                severity,
                summary: summary.into(),
                issued_at: now,
                expires_at: self.expiry.map(|d| now + d),
                state: TicketState::Pending,
            }
        });
    }

    /// Delivers the decision request for a ticket.
    ///
    /// Fire-and-forget from the orchestrator's perspective: a delivery
    /// failure is logged and recorded, never fatal. Returns whether
    /// delivery succeeded.
    pub async fn dispatch(&self, ticket: &ApprovalTicket) -> bool {
        let request = DecisionRequest {
            incident_id: ticket.incident_id,
            severity: ticket.severity,
            summary: ticket.summary.clone(),
            approval_token: ticket.token.clone(),
            requested_at: ticket.issued_at,
        };

        match self.notifier.notify(&request).await {
            Ok(()) => {
                info!(
                    incident_id = %ticket.incident_id,
                    channel = self.notifier.name(),
                    "decision request delivered"
                );
                true
            }
            Err(e) => {
                warn!(
                    incident_id = %ticket.incident_id,
                    channel = self.notifier.name(),
                    error = %e,
                    "decision request delivery failed"
                );
                self.bus.publish(EngineEvent::NotificationFailed {
                    incident_id: ticket.incident_id,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Consumes a token, committing this caller as the winning resolver.
    ///
    /// Safe to call concurrently for the same token: the check and the
    /// state flip happen under one write lock, so exactly one caller wins
    /// and the rest see [`TokenError::AlreadyUsed`].
    pub async fn consume(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets.get_mut(token).ok_or(TokenError::Invalid)?;

        match ticket.state {
            TicketState::Consumed => Err(TokenError::AlreadyUsed),
            TicketState::Expired => Err(TokenError::Expired),
            TicketState::Invalidated => Err(TokenError::Invalid),
            TicketState::Pending => {
                if ticket.is_past_deadline(Utc::now()) {
                    ticket.state = TicketState::Expired;
                    return Err(TokenError::Expired);
                }
                ticket.state = TicketState::Consumed;
                Ok(ticket.incident_id)
            }
        }
    }

    /// Looks up the incident a token is bound to, regardless of state.
    pub async fn ticket_incident(&self, token: &str) -> Option<Uuid> {
        self.tickets.read().await.get(token).map(|t| t.incident_id)
    }

    /// Invalidates any outstanding ticket for an incident (cancellation).
    ///
    /// Returns true if a pending ticket was invalidated.
    pub async fn invalidate_for(&self, incident_id: Uuid) -> bool {
        let mut tickets = self.tickets.write().await;
        let mut invalidated = false;
        for ticket in tickets.values_mut() {
            if ticket.incident_id == incident_id && ticket.state == TicketState::Pending {
                ticket.state = TicketState::Invalidated;
                invalidated = true;
            }
        }
        invalidated
    }

    /// Marks pending tickets past their deadline as expired.
    ///
    /// Returns the incidents whose approval windows elapsed; the
    /// orchestrator drives each to its terminal state.
    pub async fn expire_stale(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut tickets = self.tickets.write().await;
        let mut expired = Vec::new();

        for ticket in tickets.values_mut() {
            if ticket.state == TicketState::Pending && ticket.is_past_deadline(now) {
                ticket.state = TicketState::Expired;
                expired.push(ticket.incident_id);
                warn!(
                    incident_id = %ticket.incident_id,
                    issued_at = %ticket.issued_at,
                    "approval window elapsed without a decision"
                );
            }
        }

        expired
    }

    /// Number of tickets still awaiting a decision.
    pub async fn pending_count(&self) -> usize {
        let now = Utc::now();
        self.tickets
            .read()
            .await
            .values()
            .filter(|t| t.state == TicketState::Pending && !t.is_past_deadline(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotificationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    impl CountingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }

        async fn notify(&self, _request: &DecisionRequest) -> Result<(), NotificationError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotificationError::SendFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn gate(notifier: Arc<CountingNotifier>, expiry: Option<Duration>) -> ApprovalGate {
        ApprovalGate::new(notifier, expiry, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn test_issue_and_consume() {
        let gate = gate(CountingNotifier::new(false), None);
        let incident_id = Uuid::new_v4();
        let ticket = gate.issue(incident_id, Severity::High, "summary").await;

        assert_eq!(ticket.token.len(), TOKEN_LEN);
        assert_eq!(gate.consume(&ticket.token).await, Ok(incident_id));
    }

    #[tokio::test]
    async fn test_second_consume_is_already_used() {
        let gate = gate(CountingNotifier::new(false), None);
        let ticket = gate.issue(Uuid::new_v4(), Severity::High, "summary").await;

        gate.consume(&ticket.token).await.unwrap();
        assert_eq!(
            gate.consume(&ticket.token).await,
            Err(TokenError::AlreadyUsed)
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let gate = gate(CountingNotifier::new(false), None);
        assert_eq!(gate.consume("nope").await, Err(TokenError::Invalid));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_race_safely() {
        let gate = Arc::new(gate(CountingNotifier::new(false), None));
        let ticket = gate.issue(Uuid::new_v4(), Severity::Critical, "summary").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let token = ticket.token.clone();
            handles.push(tokio::spawn(async move { gate.consume(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_non_fatal() {
        let notifier = CountingNotifier::new(true);
        let gate = gate(Arc::clone(&notifier), None);
        let ticket = gate.issue(Uuid::new_v4(), Severity::High, "summary").await;

        assert!(!gate.dispatch(&ticket).await);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        // The ticket is still resolvable.
        assert!(gate.consume(&ticket.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        let gate = gate(CountingNotifier::new(false), Some(Duration::from_millis(5)));
        let incident_id = Uuid::new_v4();
        let ticket = gate.issue(incident_id, Severity::High, "summary").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let expired = gate.expire_stale().await;
        assert_eq!(expired, vec![incident_id]);
        assert_eq!(gate.consume(&ticket.token).await, Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn test_invalidate_for_cancellation() {
        let gate = gate(CountingNotifier::new(false), None);
        let incident_id = Uuid::new_v4();
        let ticket = gate.issue(incident_id, Severity::High, "summary").await;

        assert!(gate.invalidate_for(incident_id).await);
        assert_eq!(gate.consume(&ticket.token).await, Err(TokenError::Invalid));
        assert_eq!(gate.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_adopt_keeps_existing_ticket() {
        let gate = gate(CountingNotifier::new(false), None);
        let incident_id = Uuid::new_v4();
        let ticket = gate.issue(incident_id, Severity::High, "summary").await;

        gate.consume(&ticket.token).await.unwrap();
        // Adopting an already-tracked token must not resurrect it.
        gate.adopt(&ticket.token, incident_id, Severity::High, "summary")
            .await;
        assert_eq!(
            gate.consume(&ticket.token).await,
            Err(TokenError::AlreadyUsed)
        );
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let gate = gate(CountingNotifier::new(false), None);
        let a = gate.issue(Uuid::new_v4(), Severity::High, "a").await;
        let b = gate.issue(Uuid::new_v4(), Severity::High, "b").await;
        assert_ne!(a.token, b.token);
    }
}
