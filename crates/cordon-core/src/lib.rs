//! # cordon-core
//!
//! Core orchestration engine and data models for Cordon.
//!
//! This crate provides the incident data model, the durable state store
//! contract, the uniform stage invocation contract with retry and timeout
//! policy, the severity routing seam, the human approval gate, the event
//! bus, and the orchestrator state machine that ties them together.

pub mod approval;
pub mod events;
pub mod incident;
pub mod invoker;
pub mod notifier;
pub mod orchestrator;
pub mod policy;
pub mod retry;
pub mod stage;
pub mod store;

pub use approval::{ApprovalDecision, ApprovalGate, TokenError};
pub use events::{EngineEvent, EventBus};
pub use incident::{
    Alert, AlertKind, Decision, DecisionVerdict, Incident, IncidentStatus, Indicator,
    IndicatorKind, IntelFinding, RemediationReceipt, Reputation, Severity, SeverityAssessment,
    TransitionEvent, ValidationError,
};
pub use invoker::{InvocationFailure, InvocationSuccess, StageInvoker, DEFAULT_STAGE_TIMEOUT};
pub use notifier::{DecisionRequest, NotificationError, Notifier};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStats, ACTOR_ENGINE,
    ACTOR_GATE,
};
pub use policy::{RoutePath, RoutingPolicy, SeverityRouting};
pub use retry::RetryConfig;
pub use stage::{
    IdempotencyKey, Stage, StageFailure, StageKind, StageOutcome, StageRegistry,
};
pub use store::{MemoryStateStore, StateStore, StoreError};
