//! Resilient tool invocation executor.
//!
//! One invocation runs:
//!
//! 1. idempotency check; a recorded key replays the stored refs
//! 2. concurrency slot for the connector
//! 3. circuit breaker admission
//! 4. bounded-timeout call with exponential backoff on transient failures
//! 5. breaker report and slot release
//! 6. envelope parsing, classification, refs recorded write-once
//!
//! Denials in steps 2 and 3 return [`InvocationOutcome::Deferred`] with a
//! retry-after. Business failures are normal completed outcomes. Transient
//! failures that outlive their retries, terminal failures and contract
//! violations are [`ExecutorError`]s.

pub mod classify;
pub mod envelope;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use actuator_core::config::{ActuatorConfig, ExecutorConfig};
use actuator_core::events::DomainEvent;
use actuator_core::types::{CircuitState, ConnectorId, Timestamp};
use actuator_storage::Database;

use crate::circuit_breaker::{BreakerDecision, CircuitBreaker};
use crate::error::ExecutorError;
use crate::idempotency::IdempotencyStore;
use crate::limiter::ConcurrencyLimiter;
use crate::publisher::AuditLog;
use crate::types::{DeferReason, Deferral, InvocationOutcome, ToolInvocation, ToolRunResult};

pub use classify::{ErrorClassifier, HeuristicClassifier};
pub use envelope::{EnvelopeError, ToolPayload};
pub use transport::{
    HttpToolTransport, StaticToken, TokenProvider, ToolRequest, ToolTransport, TransportError,
};

/// Why a call attempt failed.
#[derive(Debug, Clone, PartialEq)]
enum CallError {
    Transport(TransportError),
    Envelope(EnvelopeError),
}

impl CallError {
    /// Structured gateway errors are retried when the classifier reads them
    /// as a timeout or rate limit.
    fn is_retryable(&self, classifier: &dyn ErrorClassifier) -> bool {
        match self {
            CallError::Transport(e) => e.is_retryable(),
            CallError::Envelope(EnvelopeError::Protocol { code, message }) => {
                classifier.classify(code.as_deref(), message).is_transient()
            }
            CallError::Envelope(e) => e.is_retryable(),
        }
    }

    /// How the failure reflects on connector health. `None` when the call
    /// never reached the connector.
    fn connector_healthy(&self, classifier: &dyn ErrorClassifier) -> Option<bool> {
        match self {
            CallError::Transport(TransportError::Request(_)) => None,
            CallError::Transport(e) => Some(!e.is_retryable()),
            CallError::Envelope(EnvelopeError::Truncated(_) | EnvelopeError::Malformed(_)) => {
                Some(false)
            }
            CallError::Envelope(EnvelopeError::Protocol { .. }) => {
                Some(!self.is_retryable(classifier))
            }
            CallError::Envelope(EnvelopeError::MissingRefs) => Some(true),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Transport(e) => write!(f, "{}", e),
            CallError::Envelope(e) => write!(f, "{}", e),
        }
    }
}

pub struct ToolExecutor {
    transport: Arc<dyn ToolTransport>,
    breaker: CircuitBreaker,
    limiter: ConcurrencyLimiter,
    idempotency: IdempotencyStore,
    classifier: Arc<dyn ErrorClassifier>,
    audit: AuditLog,
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(db: Arc<Database>, transport: Arc<dyn ToolTransport>, config: &ActuatorConfig) -> Self {
        Self {
            transport,
            breaker: CircuitBreaker::new(Arc::clone(&db), &config.circuit_breaker),
            limiter: ConcurrencyLimiter::new(Arc::clone(&db), config.concurrency.clone()),
            idempotency: IdempotencyStore::new(Arc::clone(&db), config.store.dedupe_ttl_days),
            classifier: Arc::new(HeuristicClassifier),
            audit: AuditLog::new(db),
            config: config.executor.clone(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub async fn invoke(&self, invocation: &ToolInvocation) -> Result<InvocationOutcome, ExecutorError> {
        let connector_id = invocation.connector_id();
        let tool_run_ref = invocation.tool_run_ref();

        if let Some(refs) = self.idempotency.check(&invocation.idempotency_key)? {
            info!(
                idempotency_key = %invocation.idempotency_key,
                tool_name = %invocation.tool_name,
                "Replaying recorded side effect"
            );
            self.audit.record(&DomainEvent::InvocationReplayed {
                idempotency_key: invocation.idempotency_key.clone(),
                tool_name: invocation.tool_name.clone(),
                timestamp: Timestamp::now(),
            });
            return Ok(InvocationOutcome::Completed(ToolRunResult {
                success: true,
                external_object_refs: refs,
                tool_run_ref,
                error_code: None,
                error_class: None,
                error_message: None,
                replayed: true,
            }));
        }

        let Some(permit) = self.limiter.try_acquire(&connector_id)? else {
            return Ok(self.defer(
                invocation,
                &connector_id,
                DeferReason::ConcurrencyLimit,
                self.limiter.retry_after(),
                None,
            ));
        };

        let probe = match self.breaker.allow_request(&connector_id)? {
            BreakerDecision::Allowed { probe } => probe,
            BreakerDecision::Denied { state, retry_after } => {
                drop(permit);
                return Ok(self.defer(
                    invocation,
                    &connector_id,
                    DeferReason::CircuitOpen,
                    retry_after,
                    Some(state),
                ));
            }
        };

        let request = ToolRequest {
            name: invocation.tool_name.clone(),
            arguments: invocation.tool_arguments.clone(),
            idempotency_key: invocation.idempotency_key.clone(),
            tool_run_ref: tool_run_ref.clone(),
            action_intent_id: invocation.action_intent_id.clone(),
            tenant_id: invocation.tenant_id.clone(),
            account_id: invocation.account_id.clone(),
        };
        let (outcome, attempts) = self.call_with_retries(&request, &connector_id).await;

        let healthy = match &outcome {
            Ok(_) => Some(true),
            Err(e) => e.connector_healthy(self.classifier.as_ref()),
        };
        let reported = match healthy {
            Some(true) => self.breaker.record_success(&connector_id, probe).map(Some),
            Some(false) => self.breaker.record_failure(&connector_id, probe).map(Some),
            None => Ok(None),
        };
        if let Err(e) = permit.release() {
            warn!(connector_id = %connector_id, error = %e, "Failed to release concurrency slot");
        }
        let state = reported?;
        debug!(connector_id = %connector_id, probe, ?state, "Breaker updated");

        let result = match outcome {
            Ok(ToolPayload::Success(refs)) => {
                let refs = self.idempotency.record(
                    &invocation.idempotency_key,
                    &refs,
                    &invocation.action_intent_id,
                    &invocation.tool_name,
                )?;
                Ok(ToolRunResult {
                    success: true,
                    external_object_refs: refs,
                    tool_run_ref: tool_run_ref.clone(),
                    error_code: None,
                    error_class: None,
                    error_message: None,
                    replayed: false,
                })
            }
            Ok(ToolPayload::Failure { code, message }) => {
                let class = self.classifier.classify(code.as_deref(), &message);
                info!(
                    tool_name = %invocation.tool_name,
                    tool_run_ref = %tool_run_ref,
                    error_class = %class,
                    "Tool reported business failure"
                );
                Ok(ToolRunResult {
                    success: false,
                    external_object_refs: Vec::new(),
                    tool_run_ref: tool_run_ref.clone(),
                    error_code: code,
                    error_class: Some(class),
                    error_message: Some(message),
                    replayed: false,
                })
            }
            Err(e) => Err(self.into_executor_error(e, &tool_run_ref, attempts)),
        };

        self.audit.record(&DomainEvent::InvocationCompleted {
            tool_run_ref: tool_run_ref.clone(),
            tool_name: invocation.tool_name.clone(),
            action_intent_id: invocation.action_intent_id.clone(),
            success: matches!(&result, Ok(r) if r.success),
            error_class: match &result {
                Ok(r) => r.error_class.map(|c| c.to_string()),
                Err(e) => Some(error_kind(e).to_string()),
            },
            attempts,
            timestamp: Timestamp::now(),
        });

        result.map(InvocationOutcome::Completed)
    }

    /// Run attempts until one succeeds, fails terminally or the attempt
    /// budget runs out. Returns the last outcome and the attempts made.
    async fn call_with_retries(
        &self,
        request: &ToolRequest,
        connector_id: &ConnectorId,
    ) -> (Result<ToolPayload, CallError>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(
                tool_name = %request.name,
                tool_run_ref = %request.tool_run_ref,
                attempt,
                "Invoking tool"
            );
            let outcome = match tokio::time::timeout(self.config.timeout(), self.transport.send(request)).await {
                Err(_) => Err(CallError::Transport(TransportError::Timeout)),
                Ok(Err(e)) => Err(CallError::Transport(e)),
                Ok(Ok(body)) => envelope::parse_response(&body).map_err(CallError::Envelope),
            };

            match outcome {
                Err(e) if e.is_retryable(self.classifier.as_ref()) && attempt < max_attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        connector_id = %connector_id,
                        tool_name = %request.name,
                        attempt,
                        max_attempts,
                        retry_after_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient tool failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return (other, attempt),
            }
        }
    }

    fn into_executor_error(&self, error: CallError, tool_run_ref: &str, attempts: u32) -> ExecutorError {
        let tool_run_ref = tool_run_ref.to_string();
        let err = match error {
            CallError::Envelope(EnvelopeError::MissingRefs) => ExecutorError::ContractViolation {
                tool_run_ref,
                message: EnvelopeError::MissingRefs.to_string(),
            },
            e if e.is_retryable(self.classifier.as_ref()) => ExecutorError::Transient {
                tool_run_ref,
                attempts,
                message: e.to_string(),
            },
            CallError::Transport(e) => ExecutorError::Terminal {
                tool_run_ref,
                status: e.status(),
                code: None,
                message: e.to_string(),
            },
            CallError::Envelope(EnvelopeError::Protocol { code, message }) => {
                ExecutorError::Terminal {
                    tool_run_ref,
                    status: None,
                    code,
                    message,
                }
            }
            CallError::Envelope(e) => ExecutorError::Terminal {
                tool_run_ref,
                status: None,
                code: None,
                message: e.to_string(),
            },
        };
        warn!(error = %err, attempts, "Tool invocation failed");
        err
    }

    fn defer(
        &self,
        invocation: &ToolInvocation,
        connector_id: &ConnectorId,
        reason: DeferReason,
        retry_after: Duration,
        circuit_state: Option<CircuitState>,
    ) -> InvocationOutcome {
        let retry_after = retry_after.max(Duration::from_secs(1));
        info!(
            connector_id = %connector_id,
            tool_name = %invocation.tool_name,
            reason = reason.as_str(),
            retry_after_ms = retry_after.as_millis() as u64,
            "Tool invocation deferred"
        );
        self.audit.record(&DomainEvent::InvocationDeferred {
            connector_id: connector_id.clone(),
            tool_name: invocation.tool_name.clone(),
            reason: reason.as_str().to_string(),
            retry_after_secs: retry_after.as_secs(),
            timestamp: Timestamp::now(),
        });
        InvocationOutcome::Deferred(Deferral {
            reason,
            retry_after,
            circuit_state,
        })
    }
}

fn error_kind(error: &ExecutorError) -> &'static str {
    match error {
        ExecutorError::Transient { .. } => "TRANSIENT",
        ExecutorError::Terminal { .. } => "TERMINAL",
        ExecutorError::ContractViolation { .. } => "CONTRACT_VIOLATION",
        ExecutorError::Breaker(_) | ExecutorError::Storage(_) => "INTERNAL",
    }
}
