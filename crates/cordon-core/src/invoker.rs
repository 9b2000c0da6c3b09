//! Stage invocation with timeout, classification, and retry.
//!
//! The invoker wraps every stage call in a timeout, classifies the result,
//! and retries transient failures with capped exponential backoff. A
//! timeout counts as a transient failure. The idempotency key is held
//! constant across all attempts of one invocation.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::events::{EngineEvent, EventBus};
use crate::incident::Incident;
use crate::retry::RetryConfig;
use crate::stage::{IdempotencyKey, Stage, StageFailure, StageOutcome};

/// Default per-invocation timeout.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// A successful invocation, with the updated record.
#[derive(Debug)]
pub struct InvocationSuccess {
    /// The record returned by the stage.
    pub incident: Incident,
    /// How many attempts were made.
    pub attempts: u32,
}

/// A failed invocation, after classification and any retries.
#[derive(Debug, Clone)]
pub struct InvocationFailure {
    /// Terminal classification for this invocation.
    pub outcome: StageOutcome,
    /// How many attempts were made.
    pub attempts: u32,
    /// Message from the last failure, persisted to the audit trail.
    pub message: String,
}

/// Invokes stages under the engine's timeout and retry policy.
pub struct StageInvoker {
    stage_timeout: Duration,
    retry: RetryConfig,
    bus: Arc<EventBus>,
}

impl StageInvoker {
    /// Creates an invoker with the given timeout and retry policy.
    pub fn new(stage_timeout: Duration, retry: RetryConfig, bus: Arc<EventBus>) -> Self {
        Self {
            stage_timeout,
            retry,
            bus,
        }
    }

    /// Runs one stage entry to a terminal classification.
    ///
    /// The same record snapshot and idempotency key are presented on every
    /// attempt; deduplication of side effects is the stage's obligation.
    pub async fn invoke(
        &self,
        stage: Arc<dyn Stage>,
        incident: &Incident,
        key: &IdempotencyKey,
    ) -> Result<InvocationSuccess, InvocationFailure> {
        self.bus.publish(EngineEvent::StageStarted {
            incident_id: incident.id,
            stage: key.stage,
            epoch: key.epoch,
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = timeout(self.stage_timeout, stage.execute(incident.clone(), key)).await;

            let transient_reason = match result {
                Ok(Ok(updated)) => {
                    debug!(
                        incident_id = %incident.id,
                        stage = %key.stage,
                        attempt,
                        "stage succeeded"
                    );
                    self.bus.publish(EngineEvent::StageCompleted {
                        incident_id: incident.id,
                        stage: key.stage,
                        attempts: attempt,
                    });
                    return Ok(InvocationSuccess {
                        incident: updated,
                        attempts: attempt,
                    });
                }
                Ok(Err(StageFailure::Permanent(message))) => {
                    warn!(
                        incident_id = %incident.id,
                        stage = %key.stage,
                        attempt,
                        %message,
                        "stage failed permanently"
                    );
                    self.bus.publish(EngineEvent::StageFailed {
                        incident_id: incident.id,
                        stage: key.stage,
                        attempts: attempt,
                        permanent: true,
                        reason: message.clone(),
                    });
                    return Err(InvocationFailure {
                        outcome: StageOutcome::PermanentFailure,
                        attempts: attempt,
                        message,
                    });
                }
                Ok(Err(StageFailure::Transient(message))) => message,
                Err(_elapsed) => format!(
                    "timed out after {}ms",
                    self.stage_timeout.as_millis()
                ),
            };

            if attempt >= self.retry.max_attempts {
                warn!(
                    incident_id = %incident.id,
                    stage = %key.stage,
                    attempts = attempt,
                    reason = %transient_reason,
                    "stage retry budget exhausted"
                );
                self.bus.publish(EngineEvent::StageFailed {
                    incident_id: incident.id,
                    stage: key.stage,
                    attempts: attempt,
                    permanent: false,
                    reason: transient_reason.clone(),
                });
                return Err(InvocationFailure {
                    outcome: StageOutcome::TransientFailure,
                    attempts: attempt,
                    message: transient_reason,
                });
            }

            let delay = self.retry.delay_after(attempt);
            debug!(
                incident_id = %incident.id,
                stage = %key.stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %transient_reason,
                "retrying stage after transient failure"
            );
            self.bus.publish(EngineEvent::StageRetried {
                incident_id: incident.id,
                stage: key.stage,
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason: transient_reason,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
