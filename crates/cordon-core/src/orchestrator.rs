//! Central orchestrator for Cordon.
//!
//! The orchestrator drives each incident through a durable state machine:
//! alert validation, enrichment, triage, the severity routing decision, and
//! remediation — automatically for low severities, behind the approval gate
//! for high ones. Every persisted transition appends exactly one audit
//! entry and publishes a structured event.
//!
//! ## Suspension
//!
//! The approval wait is persisted state, not a blocked task. When an
//! incident reaches `AwaitingApproval` the driving future returns; the
//! external decision system resumes the pipeline through
//! [`Orchestrator::resolve_approval`]. The wait survives process restarts:
//! [`Orchestrator::resume_incident`] re-enters the machine at any
//! non-terminal state.
//!
//! ## Concurrency
//!
//! Incidents are fully independent. All writes go through the state
//! store's version check; a conflicting write is retried against fresh
//! state and never surfaced to callers. A transition is applied only if
//! the record is still in the expected pre-transition state.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::approval::{ApprovalDecision, ApprovalGate, TokenError};
use crate::events::{EngineEvent, EventBus};
use crate::incident::{
    Alert, DecisionVerdict, Incident, IncidentStatus, Severity, ValidationError,
};
use crate::invoker::{InvocationFailure, StageInvoker, DEFAULT_STAGE_TIMEOUT};
use crate::notifier::Notifier;
use crate::policy::{RoutePath, RoutingPolicy};
use crate::retry::RetryConfig;
use crate::stage::{IdempotencyKey, StageKind, StageOutcome, StageRegistry};
use crate::store::{StateStore, StoreError};

/// Actor recorded for engine-driven transitions.
pub const ACTOR_ENGINE: &str = "orchestrator";
/// Actor recorded for gate-driven transitions (expiry).
pub const ACTOR_GATE: &str = "approval-gate";

/// Errors that can occur in the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The ingestion payload failed validation; no record was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A state store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An approval token was refused.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// No implementation is registered for a required stage.
    #[error("no stage registered for {0}")]
    StageNotRegistered(StageKind),

    /// Cancellation was refused for the incident's current state.
    #[error("incident {id} cannot be cancelled while {status}")]
    CancellationRejected {
        /// The incident.
        id: Uuid,
        /// Its state at the time of the request.
        status: IncidentStatus,
    },

    /// Optimistic writes kept conflicting past the internal retry budget.
    #[error("persistent write contention on incident {0}")]
    CommitContention(Uuid),

    /// An engine invariant was broken.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Timeout applied to each stage invocation.
    pub stage_timeout: Duration,
    /// Retry policy for transient stage failures.
    pub retry: RetryConfig,
    /// Bound on the approval wait. `None` waits indefinitely.
    pub approval_expiry: Option<Duration>,
    /// Internal retry budget for conflicting optimistic writes.
    pub max_commit_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            retry: RetryConfig::default(),
            approval_expiry: None,
            max_commit_retries: 5,
        }
    }
}

/// Counters for engine activity.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    /// Alerts presented to ingestion.
    pub alerts_received: u64,
    /// Alerts rejected by validation.
    pub alerts_rejected: u64,
    /// Incident records created.
    pub incidents_created: u64,
    /// Incidents that reached `Completed`.
    pub incidents_completed: u64,
    /// Incidents that reached `Failed`.
    pub incidents_failed: u64,
    /// Incidents rejected by an approver.
    pub incidents_rejected: u64,
    /// Incidents whose approval window elapsed.
    pub incidents_expired: u64,
    /// Incidents cancelled by an operator.
    pub incidents_cancelled: u64,
    /// Approval requests issued.
    pub approvals_requested: u64,
    /// Approval decisions applied.
    pub approvals_resolved: u64,
}

/// The orchestration engine.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn StateStore>,
    registry: StageRegistry,
    routing: Arc<dyn RoutingPolicy>,
    gate: ApprovalGate,
    invoker: StageInvoker,
    bus: Arc<EventBus>,
    stats: Arc<RwLock<OrchestratorStats>>,
}

impl Orchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: StageRegistry,
        routing: Arc<dyn RoutingPolicy>,
        notifier: Arc<dyn Notifier>,
        config: OrchestratorConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let invoker = StageInvoker::new(config.stage_timeout, config.retry.clone(), bus.clone());
        let gate = ApprovalGate::new(notifier, config.approval_expiry, bus.clone());
        Self {
            config,
            store,
            registry,
            routing,
            gate,
            invoker,
            bus,
            stats: Arc::new(RwLock::new(OrchestratorStats::default())),
        }
    }

    /// The engine's event bus, for observability subscribers.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Current engine counters.
    pub async fn stats(&self) -> OrchestratorStats {
        self.stats.read().await.clone()
    }

    /// Loads the current record for an incident.
    pub async fn get_incident(&self, id: Uuid) -> Result<Incident, OrchestratorError> {
        Ok(self.store.load(id).await?)
    }

    /// Accepts an alert, creates the incident record, and drives it to
    /// completion or to its first suspension point.
    ///
    /// Malformed alerts are rejected with a [`ValidationError`] before any
    /// record is created.
    #[instrument(skip(self, alert), fields(alert_id = %alert.alert_id))]
    pub async fn ingest_alert(&self, alert: Alert) -> Result<Uuid, OrchestratorError> {
        {
            let mut stats = self.stats.write().await;
            stats.alerts_received += 1;
        }

        if let Err(e) = alert.validate() {
            warn!(error = %e, "rejecting malformed alert");
            let mut stats = self.stats.write().await;
            stats.alerts_rejected += 1;
            return Err(e.into());
        }

        let incident = Incident::from_alert(alert.clone());
        let incident_id = incident.id;
        self.store.create(incident).await?;

        {
            let mut stats = self.stats.write().await;
            stats.incidents_created += 1;
        }
        self.bus.publish(EngineEvent::IncidentCreated {
            incident_id,
            alert_id: alert.alert_id.clone(),
        });
        info!(%incident_id, severity = "unassessed", "incident created from alert");

        self.drive(incident_id).await?;
        Ok(incident_id)
    }

    /// Re-enters the state machine for an incident, e.g. after a process
    /// restart.
    ///
    /// Suspended incidents have their approval ticket re-registered under
    /// the original token; everything else is driven forward from its
    /// current state. Mid-stage states re-run their stage under the same
    /// idempotency epoch, so a half-applied attempt is deduplicated by the
    /// stage.
    #[instrument(skip(self))]
    pub async fn resume_incident(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let incident = self.store.load(id).await?;
        if incident.status == IncidentStatus::AwaitingApproval {
            if let Some(token) = &incident.approval_token {
                let severity = incident
                    .severity
                    .map(|a| a.level)
                    .unwrap_or(Severity::High);
                self.gate
                    .adopt(token, id, severity, Self::summarize(&incident))
                    .await;
            }
            return Ok(());
        }
        self.drive(id).await
    }

    /// Applies a human approval decision delivered through the callback
    /// endpoint.
    ///
    /// Resolution is idempotent-safe: the first call with a valid token
    /// wins; later calls return [`TokenError::AlreadyUsed`] and change
    /// nothing. Approved incidents continue into remediation before this
    /// call returns; rejected incidents terminate with no remediation.
    #[instrument(skip(self, token))]
    pub async fn resolve_approval(
        &self,
        token: &str,
        decision: ApprovalDecision,
        actor: &str,
    ) -> Result<Uuid, OrchestratorError> {
        let incident_id = match self.gate.consume(token).await {
            Ok(id) => id,
            Err(TokenError::Expired) => {
                // The sweep may not have run yet; converge the record first.
                if let Some(id) = self.gate.ticket_incident(token).await {
                    self.mark_expired(id).await?;
                }
                return Err(TokenError::Expired.into());
            }
            Err(e) => return Err(e.into()),
        };

        let incident = self.store.load(incident_id).await?;
        if incident.status != IncidentStatus::AwaitingApproval {
            return Err(TokenError::NotAwaitingApproval(incident_id).into());
        }

        match decision {
            ApprovalDecision::Approved => {
                let decided_by = actor.to_string();
                self.commit(
                    incident_id,
                    IncidentStatus::AwaitingApproval,
                    IncidentStatus::Remediating,
                    actor,
                    format!("approval granted by {}; remediation started", actor),
                    move |record| {
                        let _ = record.set_decision(DecisionVerdict::Approved, &decided_by);
                    },
                )
                .await?;
                self.note_resolution(incident_id, DecisionVerdict::Approved, actor)
                    .await;
                self.drive(incident_id).await?;
            }
            ApprovalDecision::Rejected => {
                let decided_by = actor.to_string();
                self.commit(
                    incident_id,
                    IncidentStatus::AwaitingApproval,
                    IncidentStatus::Rejected,
                    actor,
                    format!("approval rejected by {}; remediation withheld", actor),
                    move |record| {
                        let _ = record.set_decision(DecisionVerdict::Rejected, &decided_by);
                    },
                )
                .await?;
                self.note_resolution(incident_id, DecisionVerdict::Rejected, actor)
                    .await;
                let mut stats = self.stats.write().await;
                stats.incidents_rejected += 1;
            }
        }

        Ok(incident_id)
    }

    /// Cancels an incident.
    ///
    /// Allowed only between stage invocations and while awaiting approval;
    /// a cancelled approval wait invalidates the outstanding token.
    #[instrument(skip(self))]
    pub async fn cancel_incident(&self, id: Uuid, actor: &str) -> Result<(), OrchestratorError> {
        let incident = self.store.load(id).await?;
        if incident.status.is_terminal() || incident.status.is_mid_stage() {
            return Err(OrchestratorError::CancellationRejected {
                id,
                status: incident.status,
            });
        }

        let was_awaiting = incident.status == IncidentStatus::AwaitingApproval;
        let committed = self
            .commit(
                id,
                incident.status,
                IncidentStatus::Cancelled,
                actor,
                format!("cancelled by {}", actor),
                |_| {},
            )
            .await?;

        if committed.is_some() {
            if was_awaiting {
                self.gate.invalidate_for(id).await;
            }
            self.bus.publish(EngineEvent::IncidentCancelled {
                incident_id: id,
                actor: actor.to_string(),
            });
            let mut stats = self.stats.write().await;
            stats.incidents_cancelled += 1;
        }
        Ok(())
    }

    /// Expires approval waits whose configured window has elapsed.
    ///
    /// Returns how many incidents were driven to `Expired`. A no-op unless
    /// an approval expiry is configured.
    pub async fn expire_stale_approvals(&self) -> Result<usize, OrchestratorError> {
        let expired = self.gate.expire_stale().await;
        let count = expired.len();
        for id in expired {
            self.mark_expired(id).await?;
        }
        Ok(count)
    }

    /// Runs the state machine until the incident reaches a terminal state
    /// or a suspension point.
    async fn drive(&self, id: Uuid) -> Result<(), OrchestratorError> {
        loop {
            let incident = self.store.load(id).await?;
            match incident.status {
                IncidentStatus::New => {
                    self.commit(
                        id,
                        IncidentStatus::New,
                        IncidentStatus::Enriching,
                        ACTOR_ENGINE,
                        format!(
                            "alert {} ingested; enrichment started",
                            incident.raw_alert.alert_id
                        ),
                        |_| {},
                    )
                    .await?;
                }
                IncidentStatus::Enriching => {
                    self.run_enrichment(&incident).await?;
                }
                IncidentStatus::Enriched => {
                    self.commit(
                        id,
                        IncidentStatus::Enriched,
                        IncidentStatus::Triaging,
                        ACTOR_ENGINE,
                        "triage started".to_string(),
                        |_| {},
                    )
                    .await?;
                }
                IncidentStatus::Triaging => {
                    self.run_triage(&incident).await?;
                }
                IncidentStatus::Triaged => {
                    self.route(&incident).await?;
                }
                IncidentStatus::AutoRemediating => {
                    self.commit(
                        id,
                        IncidentStatus::AutoRemediating,
                        IncidentStatus::Remediating,
                        ACTOR_ENGINE,
                        "remediation started".to_string(),
                        |_| {},
                    )
                    .await?;
                }
                IncidentStatus::Remediating => {
                    self.run_remediation(&incident).await?;
                }
                IncidentStatus::AwaitingApproval
                | IncidentStatus::Completed
                | IncidentStatus::Failed
                | IncidentStatus::Rejected
                | IncidentStatus::Expired
                | IncidentStatus::Cancelled => return Ok(()),
            }
        }
    }

    async fn run_enrichment(&self, incident: &Incident) -> Result<(), OrchestratorError> {
        let stage = self
            .registry
            .get(StageKind::Enrichment)
            .ok_or(OrchestratorError::StageNotRegistered(StageKind::Enrichment))?;
        let epoch = incident.next_stage_epoch(StageKind::Enrichment);
        let key = IdempotencyKey::new(incident.id, StageKind::Enrichment, epoch);

        match self.invoker.invoke(stage, incident, &key).await {
            Ok(success) => {
                let findings = success.incident.enrichment.clone();
                let detail = format!(
                    "enrichment complete: {} finding(s) after {} attempt(s); triage started",
                    findings.len(),
                    success.attempts
                );
                self.commit(
                    incident.id,
                    IncidentStatus::Enriching,
                    IncidentStatus::Triaging,
                    ACTOR_ENGINE,
                    detail,
                    move |record| {
                        for (indicator, finding) in &findings {
                            record.add_finding(indicator.clone(), finding.clone());
                        }
                        record.note_stage_epoch(StageKind::Enrichment, epoch);
                    },
                )
                .await?;
                Ok(())
            }
            Err(failure) => {
                self.fail_stage(
                    incident.id,
                    IncidentStatus::Enriching,
                    StageKind::Enrichment,
                    failure,
                )
                .await
            }
        }
    }

    async fn run_triage(&self, incident: &Incident) -> Result<(), OrchestratorError> {
        let stage = self
            .registry
            .get(StageKind::Triage)
            .ok_or(OrchestratorError::StageNotRegistered(StageKind::Triage))?;
        let epoch = incident.next_stage_epoch(StageKind::Triage);
        let key = IdempotencyKey::new(incident.id, StageKind::Triage, epoch);

        match self.invoker.invoke(stage, incident, &key).await {
            Ok(success) => {
                let assessment = match success.incident.severity {
                    Some(assessment) => assessment,
                    None => {
                        // A triage stage that classifies nothing has broken
                        // its contract; there is no point retrying it.
                        return self
                            .fail_stage(
                                incident.id,
                                IncidentStatus::Triaging,
                                StageKind::Triage,
                                InvocationFailure {
                                    outcome: StageOutcome::PermanentFailure,
                                    attempts: success.attempts,
                                    message: "triage returned no severity assessment"
                                        .to_string(),
                                },
                            )
                            .await;
                    }
                };

                let detail = format!(
                    "triage complete after {} attempt(s): severity {}",
                    success.attempts, assessment
                );
                self.commit(
                    incident.id,
                    IncidentStatus::Triaging,
                    IncidentStatus::Triaged,
                    ACTOR_ENGINE,
                    detail,
                    move |record| {
                        // A retried commit may find it already recorded.
                        let _ = record.set_severity(assessment);
                        record.note_stage_epoch(StageKind::Triage, epoch);
                    },
                )
                .await?;
                Ok(())
            }
            Err(failure) => {
                self.fail_stage(
                    incident.id,
                    IncidentStatus::Triaging,
                    StageKind::Triage,
                    failure,
                )
                .await
            }
        }
    }

    /// Evaluates the severity routing decision.
    ///
    /// This is the single authorization checkpoint in the engine: it runs
    /// exactly once per incident, and its verdict is committed to the audit
    /// trail before any remediation stage is invoked.
    async fn route(&self, incident: &Incident) -> Result<(), OrchestratorError> {
        let assessment = incident.severity.ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "incident {} reached routing without a severity assessment",
                incident.id
            ))
        })?;
        let path = self.routing.route(&assessment);
        info!(
            incident_id = %incident.id,
            severity = %assessment.level,
            score = assessment.score,
            path = %path,
            "routing decision evaluated"
        );

        match path {
            RoutePath::AutoRemediate => {
                let detail = format!(
                    "routing decision: severity {} -> {}; remediation started",
                    assessment, path
                );
                self.commit(
                    incident.id,
                    IncidentStatus::Triaged,
                    IncidentStatus::Remediating,
                    ACTOR_ENGINE,
                    detail,
                    |_| {},
                )
                .await?;
            }
            RoutePath::RequireApproval => {
                let ticket = self
                    .gate
                    .issue(incident.id, assessment.level, Self::summarize(incident))
                    .await;
                let token = ticket.token.clone();
                let detail = format!(
                    "routing decision: severity {} -> {}; decision request issued",
                    assessment, path
                );
                let committed = self
                    .commit(
                        incident.id,
                        IncidentStatus::Triaged,
                        IncidentStatus::AwaitingApproval,
                        ACTOR_ENGINE,
                        detail,
                        move |record| {
                            record.approval_token = Some(token.clone());
                        },
                    )
                    .await?;

                match committed {
                    Some(_) => {
                        let notified = self.gate.dispatch(&ticket).await;
                        self.bus.publish(EngineEvent::ApprovalRequested {
                            incident_id: incident.id,
                            severity: assessment.level,
                            notified,
                        });
                        let mut stats = self.stats.write().await;
                        stats.approvals_requested += 1;
                    }
                    None => self.gate.discard(&ticket.token).await,
                }
            }
        }
        Ok(())
    }

    async fn run_remediation(&self, incident: &Incident) -> Result<(), OrchestratorError> {
        let stage = self
            .registry
            .get(StageKind::Remediation)
            .ok_or(OrchestratorError::StageNotRegistered(StageKind::Remediation))?;
        let epoch = incident.next_stage_epoch(StageKind::Remediation);
        let key = IdempotencyKey::new(incident.id, StageKind::Remediation, epoch);

        match self.invoker.invoke(stage, incident, &key).await {
            Ok(success) => {
                let receipt = success.incident.remediation.clone();
                let summary = receipt
                    .as_ref()
                    .map(|r| r.message.clone())
                    .unwrap_or_else(|| "no action required".to_string());
                let detail = format!(
                    "remediation complete after {} attempt(s): {}",
                    success.attempts, summary
                );
                let committed = self
                    .commit(
                        incident.id,
                        IncidentStatus::Remediating,
                        IncidentStatus::Completed,
                        ACTOR_ENGINE,
                        detail,
                        move |record| {
                            if record.remediation.is_none() {
                                record.remediation = receipt.clone();
                            }
                            record.note_stage_epoch(StageKind::Remediation, epoch);
                        },
                    )
                    .await?;
                if committed.is_some() {
                    let mut stats = self.stats.write().await;
                    stats.incidents_completed += 1;
                }
                Ok(())
            }
            Err(failure) => {
                self.fail_stage(
                    incident.id,
                    IncidentStatus::Remediating,
                    StageKind::Remediation,
                    failure,
                )
                .await
            }
        }
    }

    /// Commits a stage's failure branch.
    async fn fail_stage(
        &self,
        id: Uuid,
        from: IncidentStatus,
        stage: StageKind,
        failure: InvocationFailure,
    ) -> Result<(), OrchestratorError> {
        let detail = match failure.outcome {
            StageOutcome::PermanentFailure => {
                format!("{} failed permanently: {}", stage, failure.message)
            }
            _ => format!(
                "{} failed after {} attempt(s): {}",
                stage, failure.attempts, failure.message
            ),
        };
        let committed = self
            .commit(id, from, IncidentStatus::Failed, ACTOR_ENGINE, detail, |_| {})
            .await?;
        if committed.is_some() {
            let mut stats = self.stats.write().await;
            stats.incidents_failed += 1;
        }
        Ok(())
    }

    /// Drives an incident whose approval window elapsed to `Expired`.
    async fn mark_expired(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let committed = self
            .commit(
                id,
                IncidentStatus::AwaitingApproval,
                IncidentStatus::Expired,
                ACTOR_GATE,
                "approval window elapsed without a decision".to_string(),
                |record| {
                    let _ = record.set_decision(DecisionVerdict::Expired, ACTOR_GATE);
                },
            )
            .await?;
        if committed.is_some() {
            self.note_resolution(id, DecisionVerdict::Expired, ACTOR_GATE)
                .await;
            let mut stats = self.stats.write().await;
            stats.incidents_expired += 1;
        }
        Ok(())
    }

    async fn note_resolution(&self, incident_id: Uuid, verdict: DecisionVerdict, actor: &str) {
        self.bus.publish(EngineEvent::ApprovalResolved {
            incident_id,
            verdict,
            actor: actor.to_string(),
        });
        let mut stats = self.stats.write().await;
        stats.approvals_resolved += 1;
    }

    /// Applies one transition under optimistic concurrency.
    ///
    /// Loads fresh state, verifies the record is still in `expect_from`,
    /// applies `mutate`, appends the audit entry, and writes with a version
    /// check. Conflicts are retried against fresh state; a record that has
    /// moved on is left alone (`Ok(None)`), and the caller's drive loop
    /// re-dispatches on whatever state it finds.
    async fn commit<F>(
        &self,
        id: Uuid,
        expect_from: IncidentStatus,
        to: IncidentStatus,
        actor: &str,
        detail: String,
        mutate: F,
    ) -> Result<Option<Incident>, OrchestratorError>
    where
        F: Fn(&mut Incident),
    {
        for _ in 0..=self.config.max_commit_retries {
            let mut incident = self.store.load(id).await?;
            if incident.status != expect_from {
                debug!(
                    incident_id = %id,
                    expected = %expect_from,
                    actual = %incident.status,
                    "transition superseded by a concurrent update"
                );
                return Ok(None);
            }

            let expected_version = incident.version;
            mutate(&mut incident);
            incident.record_transition(to, actor, detail.clone());

            match self.store.update(incident, expected_version).await {
                Ok(stored) => {
                    if let Some(entry) = stored.audit_trail.last() {
                        self.bus.publish(EngineEvent::TransitionRecorded {
                            incident_id: id,
                            from_status: entry.from_status,
                            to_status: entry.to_status,
                            timestamp: entry.timestamp,
                            actor: entry.actor.clone(),
                            detail: entry.detail.clone(),
                        });
                    }
                    info!(
                        incident_id = %id,
                        from = %expect_from,
                        to = %to,
                        actor,
                        "transition recorded"
                    );
                    return Ok(Some(stored));
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(incident_id = %id, "optimistic write conflict; retrying against fresh state");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::CommitContention(id))
    }

    /// Builds the human-readable summary for a decision request.
    fn summarize(incident: &Incident) -> String {
        let severity = incident
            .severity
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unclassified".to_string());
        format!(
            "alert {} ({}) from {} classified {}; remediation requires a decision",
            incident.raw_alert.alert_id,
            incident.raw_alert.kind,
            incident.raw_alert.source_ip,
            severity
        )
    }
}
