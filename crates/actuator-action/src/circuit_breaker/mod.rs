//! Per-connector circuit breaker backed by the shared store.
//!
//! Every transition is a compare-and-set on the stored record's version.
//! A writer that loses the race reloads and re-evaluates, so exactly one
//! caller wins the OPEN -> HALF_OPEN probe.

pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use actuator_core::config::CircuitBreakerConfig;
use actuator_core::error::ActuatorError;
use actuator_core::events::DomainEvent;
use actuator_core::types::{CircuitState, ConnectorId, Timestamp};
use actuator_storage::{BreakerRecord, BreakerRepository, Database};

use crate::error::BreakerError;
use crate::publisher::AuditLog;

pub use state_machine::{Admission, BreakerPolicy, BreakerState};

/// Upper bound on reload-and-retry rounds for one operation.
const MAX_CAS_ROUNDS: u32 = 16;

/// Result of `allow_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allowed {
        /// This caller is the HALF_OPEN probe.
        probe: bool,
    },
    Denied {
        state: CircuitState,
        retry_after: Duration,
    },
}

impl BreakerDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BreakerDecision::Allowed { .. })
    }
}

pub struct CircuitBreaker {
    repo: BreakerRepository,
    policy: BreakerPolicy,
    ttl_days: u32,
    audit: AuditLog,
}

impl CircuitBreaker {
    pub fn new(db: Arc<Database>, config: &CircuitBreakerConfig) -> Self {
        Self {
            repo: BreakerRepository::new(Arc::clone(&db)),
            policy: BreakerPolicy::from(config),
            ttl_days: config.effective_ttl_days(),
            audit: AuditLog::new(db),
        }
    }

    pub fn allow_request(&self, connector_id: &ConnectorId) -> Result<BreakerDecision, BreakerError> {
        self.allow_request_at(connector_id, Timestamp::now())
    }

    pub fn allow_request_at(
        &self,
        connector_id: &ConnectorId,
        now: Timestamp,
    ) -> Result<BreakerDecision, BreakerError> {
        for _ in 0..MAX_CAS_ROUNDS {
            let Some(record) = self.repo.load(connector_id, now)? else {
                // No record reads as CLOSED.
                return Ok(BreakerDecision::Allowed { probe: false });
            };
            let state = record_to_state(&record)?;

            match state_machine::admit(&state, &self.policy, now) {
                Admission::Allow => return Ok(BreakerDecision::Allowed { probe: false }),
                Admission::Deny { retry_after_secs } => {
                    debug!(
                        connector_id = %connector_id,
                        state = %state.kind(),
                        retry_after_secs,
                        "Circuit breaker denied request"
                    );
                    return Ok(BreakerDecision::Denied {
                        state: state.kind(),
                        retry_after: Duration::from_secs(retry_after_secs),
                    });
                }
                Admission::Probe { next } => {
                    if self.try_store(&record, &state, next, now)? {
                        info!(connector_id = %connector_id, "Circuit half-open, probe admitted");
                        return Ok(BreakerDecision::Allowed { probe: true });
                    }
                    // Lost the race; the reload will show the winner's probe.
                }
            }
        }
        Err(BreakerError::Contention(connector_id.clone(), MAX_CAS_ROUNDS))
    }

    /// Report a call the connector answered. `probe` comes from the
    /// [`BreakerDecision::Allowed`] that admitted the call.
    pub fn record_success(
        &self,
        connector_id: &ConnectorId,
        probe: bool,
    ) -> Result<CircuitState, BreakerError> {
        self.record_success_at(connector_id, probe, Timestamp::now())
    }

    pub fn record_success_at(
        &self,
        connector_id: &ConnectorId,
        probe: bool,
        now: Timestamp,
    ) -> Result<CircuitState, BreakerError> {
        self.apply(connector_id, now, move |state| {
            state_machine::on_success(state, probe)
        })
    }

    pub fn record_failure(
        &self,
        connector_id: &ConnectorId,
        probe: bool,
    ) -> Result<CircuitState, BreakerError> {
        self.record_failure_at(connector_id, probe, Timestamp::now())
    }

    pub fn record_failure_at(
        &self,
        connector_id: &ConnectorId,
        probe: bool,
        now: Timestamp,
    ) -> Result<CircuitState, BreakerError> {
        let policy = self.policy;
        self.apply(connector_id, now, move |state| {
            state_machine::on_failure(state, &policy, now, probe)
        })
    }

    /// Current stored state, or CLOSED when none is stored.
    pub fn state_at(
        &self,
        connector_id: &ConnectorId,
        now: Timestamp,
    ) -> Result<BreakerState, BreakerError> {
        match self.repo.load(connector_id, now)? {
            Some(record) => Ok(record_to_state(&record)?),
            None => Ok(BreakerState::closed()),
        }
    }

    /// Load-transition-store loop shared by the `record_*` operations.
    fn apply<F>(
        &self,
        connector_id: &ConnectorId,
        now: Timestamp,
        transition: F,
    ) -> Result<CircuitState, BreakerError>
    where
        F: Fn(&BreakerState) -> BreakerState,
    {
        for _ in 0..MAX_CAS_ROUNDS {
            let record = match self.repo.load(connector_id, now)? {
                Some(record) => record,
                None => {
                    let fresh = BreakerRecord::closed(
                        connector_id.clone(),
                        now,
                        now.plus_days(self.ttl_days),
                    );
                    if self.repo.insert_if_absent(&fresh)? {
                        debug!(connector_id = %connector_id, "Breaker record created");
                    }
                    continue;
                }
            };

            let state = record_to_state(&record)?;
            let next = transition(&state);
            if next == state {
                return Ok(state.kind());
            }
            if self.try_store(&record, &state, next, now)? {
                return Ok(next.kind());
            }
        }
        Err(BreakerError::Contention(connector_id.clone(), MAX_CAS_ROUNDS))
    }

    /// Compare-and-set `next` over `record`. Returns `false` on a lost race.
    fn try_store(
        &self,
        record: &BreakerRecord,
        current: &BreakerState,
        next: BreakerState,
        now: Timestamp,
    ) -> Result<bool, BreakerError> {
        let next_record = state_to_record(
            &record.connector_id,
            next,
            record.version,
            now,
            now.plus_days(self.ttl_days),
        );
        if !self.repo.compare_and_set(&next_record, record.version)? {
            return Ok(false);
        }

        if current.kind() != next.kind() {
            match next {
                BreakerState::Open { open_until } => warn!(
                    connector_id = %record.connector_id,
                    from = %current.kind(),
                    open_until = open_until.0,
                    "Circuit opened"
                ),
                _ => info!(
                    connector_id = %record.connector_id,
                    from = %current.kind(),
                    to = %next.kind(),
                    "Circuit state changed"
                ),
            }
            self.audit.record(&DomainEvent::CircuitStateChanged {
                connector_id: record.connector_id.clone(),
                from: current.kind().to_string(),
                to: next.kind().to_string(),
                timestamp: now,
            });
        }
        Ok(true)
    }
}

fn record_to_state(record: &BreakerRecord) -> Result<BreakerState, ActuatorError> {
    let missing = |field: &str| {
        ActuatorError::Storage(format!(
            "Breaker record for {} is {} without {}",
            record.connector_id, record.state, field
        ))
    };
    Ok(match record.state {
        CircuitState::Closed => BreakerState::Closed {
            failure_count: record.failure_count,
            window_start: record.window_start,
        },
        CircuitState::Open => BreakerState::Open {
            open_until: record.open_until.ok_or_else(|| missing("open_until"))?,
        },
        CircuitState::HalfOpen => BreakerState::HalfOpen {
            probe_in_flight: record.probe_in_flight,
            lease_until: record.open_until.ok_or_else(|| missing("open_until"))?,
        },
    })
}

fn state_to_record(
    connector_id: &ConnectorId,
    state: BreakerState,
    version: i64,
    now: Timestamp,
    expires_at: Timestamp,
) -> BreakerRecord {
    let mut record = BreakerRecord::closed(connector_id.clone(), now, expires_at);
    record.version = version;
    match state {
        BreakerState::Closed {
            failure_count,
            window_start,
        } => {
            record.failure_count = failure_count;
            record.window_start = window_start;
        }
        BreakerState::Open { open_until } => {
            record.state = CircuitState::Open;
            record.open_until = Some(open_until);
        }
        BreakerState::HalfOpen {
            probe_in_flight,
            lease_until,
        } => {
            record.state = CircuitState::HalfOpen;
            record.open_until = Some(lease_until);
            record.probe_in_flight = probe_in_flight;
        }
    }
    record
}
