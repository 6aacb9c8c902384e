//! Error types for the execution fabric.

use actuator_core::error::ActuatorError;
use actuator_core::types::{ActionIntentId, ConnectorId};

/// Errors from circuit breaker bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("Breaker state for {0} changed on every attempt; gave up after {1} tries")]
    Contention(ConnectorId, u32),
    #[error("Storage error: {0}")]
    Storage(#[from] ActuatorError),
}

/// Errors from the autonomy budget ledger.
///
/// A refused consumption is not an error; it is reported through
/// `ConsumeOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error("Storage error: {0}")]
    Storage(#[from] ActuatorError),
}

/// Errors from the auto-approval gate that do not fold into a
/// REQUIRE_APPROVAL outcome.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Action intent not found: {0}")]
    IntentNotFound(ActionIntentId),
    #[error("Action intent expired: {0}")]
    IntentExpired(ActionIntentId),
    /// Another evaluation held an uncommitted reservation for the whole
    /// wait. Retrying later either finds its result or takes the claim over.
    #[error("Another evaluation still holds the reservation for {0}")]
    ReservationInProgress(ActionIntentId),
    /// The claim stays committed, so a retry re-publishes without consuming
    /// budget again.
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),
    #[error("Storage error: {0}")]
    Storage(#[from] ActuatorError),
}

impl GateError {
    /// Whether calling the gate again for the same intent can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::ReservationInProgress(_) | GateError::Publish(_)
        )
    }
}

/// Errors raised by the tool invocation executor.
///
/// Business failures and deferrals are normal outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Transient failure after {attempts} attempts ({tool_run_ref}): {message}")]
    Transient {
        tool_run_ref: String,
        attempts: u32,
        message: String,
    },
    #[error("Terminal failure ({tool_run_ref}): {message}")]
    Terminal {
        tool_run_ref: String,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    #[error("Contract violation ({tool_run_ref}): {message}")]
    ContractViolation {
        tool_run_ref: String,
        message: String,
    },
    #[error("Breaker error: {0}")]
    Breaker(#[from] BreakerError),
    #[error("Storage error: {0}")]
    Storage(#[from] ActuatorError),
}

impl ExecutorError {
    /// Whether a later invocation with a new attempt count may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Transient { .. })
    }
}

/// Errors returned by connector adapters.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("No connector registered for tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Rejected by connector ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("Connector unavailable: {0}")]
    Unavailable(String),
    #[error("Connector rate limited: {0}")]
    RateLimited(String),
    #[error("Storage error: {0}")]
    Storage(#[from] ActuatorError),
}
