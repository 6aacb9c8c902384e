//! Circuit breaker state machine.
//!
//! ```text
//!   CLOSED ──(threshold failures in window)──▶ OPEN ──(cooldown elapsed)──▶ HALF_OPEN
//!     ▲                                         ▲                             │
//!     │                                         └────────(probe fails)────────┤
//!     └─────────────────────────(probe succeeds)──────────────────────────────┘
//! ```
//!
//! Pure functions over [`BreakerState`]; persistence lives in the parent
//! module.

use actuator_core::config::CircuitBreakerConfig;
use actuator_core::types::{CircuitState, Timestamp};

/// Breaker state with the data each state needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed {
        failure_count: u32,
        window_start: Option<Timestamp>,
    },
    Open {
        open_until: Timestamp,
    },
    /// A probe holds a lease until `lease_until`. After that the probe is
    /// presumed lost and another caller may take over.
    HalfOpen {
        probe_in_flight: bool,
        lease_until: Timestamp,
    },
}

impl BreakerState {
    pub const fn closed() -> Self {
        BreakerState::Closed {
            failure_count: 0,
            window_start: None,
        }
    }

    pub fn kind(&self) -> CircuitState {
        match self {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Thresholds the transitions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub window_secs: i64,
    pub cooldown_secs: i64,
}

impl From<&CircuitBreakerConfig> for BreakerPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            window_secs: config.window_secs as i64,
            cooldown_secs: config.cooldown_secs.max(1) as i64,
        }
    }
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed; no state change.
    Allow,
    /// Proceed as the single probe, provided `next` is stored first.
    Probe { next: BreakerState },
    /// Do not call the connector for `retry_after_secs` (always >= 1).
    Deny { retry_after_secs: u64 },
}

fn retry_after(now: Timestamp, until: Timestamp) -> u64 {
    now.secs_until(until).max(1)
}

fn start_probe(policy: &BreakerPolicy, now: Timestamp) -> Admission {
    Admission::Probe {
        next: BreakerState::HalfOpen {
            probe_in_flight: true,
            lease_until: now.plus_secs(policy.cooldown_secs),
        },
    }
}

pub fn admit(state: &BreakerState, policy: &BreakerPolicy, now: Timestamp) -> Admission {
    match *state {
        BreakerState::Closed { .. } => Admission::Allow,
        BreakerState::Open { open_until } if now < open_until => Admission::Deny {
            retry_after_secs: retry_after(now, open_until),
        },
        BreakerState::Open { .. } => start_probe(policy, now),
        BreakerState::HalfOpen {
            probe_in_flight: true,
            lease_until,
        } if now < lease_until => Admission::Deny {
            retry_after_secs: retry_after(now, lease_until),
        },
        BreakerState::HalfOpen { .. } => start_probe(policy, now),
    }
}

/// State after the connector answered. `probe` is whether the call was
/// admitted as the HALF_OPEN probe.
///
/// A late success arriving while OPEN (from a call admitted before the
/// circuit opened) does not close it, and neither does one arriving while
/// HALF_OPEN from a call that was not the probe; only the probe can.
pub fn on_success(state: &BreakerState, probe: bool) -> BreakerState {
    match *state {
        BreakerState::Open { open_until } => BreakerState::Open { open_until },
        BreakerState::HalfOpen { .. } if !probe => *state,
        BreakerState::Closed { .. } | BreakerState::HalfOpen { .. } => BreakerState::closed(),
    }
}

/// State after a call failed transiently with all retries spent. In
/// HALF_OPEN only the probe's failure reopens the circuit.
pub fn on_failure(
    state: &BreakerState,
    policy: &BreakerPolicy,
    now: Timestamp,
    probe: bool,
) -> BreakerState {
    let open = BreakerState::Open {
        open_until: now.plus_secs(policy.cooldown_secs),
    };

    match *state {
        BreakerState::HalfOpen { .. } if !probe => *state,
        BreakerState::HalfOpen { .. } => open,
        BreakerState::Open { open_until } => BreakerState::Open { open_until },
        BreakerState::Closed {
            failure_count,
            window_start,
        } => {
            let (count, start) = match window_start {
                Some(start) if now.0 - start.0 < policy.window_secs => {
                    (failure_count.saturating_add(1), start)
                }
                _ => (1, now),
            };
            if count >= policy.failure_threshold {
                open
            } else {
                BreakerState::Closed {
                    failure_count: count,
                    window_start: Some(start),
                }
            }
        }
    }
}
