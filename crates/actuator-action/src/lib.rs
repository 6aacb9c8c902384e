//! Action execution fabric for Actuator.
//!
//! Decides whether approved actions may run unattended, then runs them
//! against connectors with exactly-once side effects, per-connector
//! circuit breaking and concurrency bounds.

pub mod budget;
pub mod circuit_breaker;
pub mod connector;
pub mod error;
pub mod executor;
pub mod gate;
pub mod idempotency;
pub mod limiter;
pub mod publisher;
pub mod types;

pub use budget::{BudgetLedger, BudgetRefusal, BudgetRemaining, ConsumeOutcome};
pub use circuit_breaker::{BreakerDecision, CircuitBreaker};
pub use connector::{ConnectorAdapter, ConnectorRegistry, IdempotentAdapter, InternalNoteAdapter};
pub use error::{BreakerError, BudgetError, ConnectorError, ExecutorError, GateError};
pub use executor::{
    ErrorClassifier, HeuristicClassifier, HttpToolTransport, StaticToken, TokenProvider,
    ToolExecutor, ToolTransport,
};
pub use gate::AutoApprovalGate;
pub use idempotency::IdempotencyStore;
pub use limiter::{ConcurrencyLimiter, SlotPermit};
pub use publisher::{ApprovalPublisher, AuditLog, OutboxPublisher};
pub use types::{
    DeferReason, Deferral, ErrorClass, GateOutcome, GateReason, GateRequest, GateResult,
    HumanApprovalOutcome, InvocationOutcome, ToolInvocation, ToolRunResult,
};
