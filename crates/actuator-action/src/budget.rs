//! Autonomy budget ledger.
//!
//! Consumption is two conditional increments: the day's total against the
//! daily cap, then the action type's count against its own cap. Every type
//! is counted, capped or not, so the total always equals the sum of the type
//! counts. If the second increment is refused the first is rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use actuator_core::types::{AccountId, ActionType, TenantId, Timestamp};
use actuator_storage::{BudgetRepository, Database};

use crate::error::BudgetError;

/// Why a unit of budget was not consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetRefusal {
    /// No budget configured for the account.
    NotConfigured,
    DailyCapReached,
    ActionTypeCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    NotConsumed(BudgetRefusal),
}

impl ConsumeOutcome {
    pub fn is_consumed(&self) -> bool {
        matches!(self, ConsumeOutcome::Consumed)
    }
}

/// Remaining units for one action type. `cap` and `remaining` are `None`
/// for a type bounded only by the daily cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRemaining {
    pub cap: Option<u32>,
    pub used: u32,
    pub remaining: Option<u32>,
}

impl TypeRemaining {
    fn new(cap: Option<u32>, used: u32) -> Self {
        Self {
            cap,
            used,
            remaining: cap.map(|c| c.saturating_sub(used)),
        }
    }
}

/// Remaining budget for an account on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetRemaining {
    pub day: String,
    pub daily_cap: u32,
    pub used: u32,
    pub remaining: u32,
    pub per_action_type: HashMap<ActionType, TypeRemaining>,
}

pub struct BudgetLedger {
    repo: BudgetRepository,
}

impl BudgetLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: BudgetRepository::new(db),
        }
    }

    pub fn try_consume(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
    ) -> Result<ConsumeOutcome, BudgetError> {
        self.try_consume_at(tenant_id, account_id, action_type, Timestamp::now())
    }

    pub fn try_consume_at(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
        now: Timestamp,
    ) -> Result<ConsumeOutcome, BudgetError> {
        let Some(config) = self.repo.load_config(tenant_id, account_id)? else {
            debug!(tenant_id = %tenant_id, account_id = %account_id, "No autonomy budget configured");
            return Ok(ConsumeOutcome::NotConsumed(BudgetRefusal::NotConfigured));
        };
        let day = now.day_key();

        if !self.repo.try_increment_total(
            tenant_id,
            account_id,
            &day,
            config.max_autonomous_per_day,
        )? {
            debug!(tenant_id = %tenant_id, account_id = %account_id, day = %day, "Daily autonomy cap reached");
            return Ok(ConsumeOutcome::NotConsumed(BudgetRefusal::DailyCapReached));
        }

        let type_cap = config.max_per_action_type.get(action_type).copied();
        let type_ok = match self
            .repo
            .try_increment_type(tenant_id, account_id, &day, action_type, type_cap)
        {
            Ok(ok) => ok,
            Err(e) => {
                self.roll_back(tenant_id, account_id, &day);
                return Err(e.into());
            }
        };

        if !type_ok {
            debug!(
                tenant_id = %tenant_id,
                account_id = %account_id,
                action_type = %action_type,
                "Action type cap reached"
            );
            self.roll_back(tenant_id, account_id, &day);
            return Ok(ConsumeOutcome::NotConsumed(BudgetRefusal::ActionTypeCapReached));
        }

        Ok(ConsumeOutcome::Consumed)
    }

    /// Return a consumed unit to the day containing `now`.
    pub fn refund_at(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
        now: Timestamp,
    ) -> Result<(), BudgetError> {
        let day = now.day_key();
        self.repo.decrement_type(tenant_id, account_id, &day, action_type)?;
        self.repo.decrement_total(tenant_id, account_id, &day)?;
        debug!(
            tenant_id = %tenant_id,
            account_id = %account_id,
            action_type = %action_type,
            "Budget unit refunded"
        );
        Ok(())
    }

    /// Best-effort undo of a total increment.
    fn roll_back(&self, tenant_id: &TenantId, account_id: &AccountId, day: &str) {
        if let Err(e) = self.repo.decrement_total(tenant_id, account_id, day) {
            warn!(
                tenant_id = %tenant_id,
                account_id = %account_id,
                day,
                error = %e,
                "Failed to roll back budget total"
            );
        }
    }

    /// Remaining units for the account on the day containing `now`.
    ///
    /// With no budget configured every cap reads as zero.
    pub fn remaining_at(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        now: Timestamp,
    ) -> Result<BudgetRemaining, BudgetError> {
        let day = now.day_key();
        let config = self.repo.load_config(tenant_id, account_id)?;
        let state = self.repo.load_state(tenant_id, account_id, &day)?;

        let daily_cap = config.as_ref().map_or(0, |c| c.max_autonomous_per_day);
        let mut caps = config.map(|c| c.max_per_action_type).unwrap_or_default();
        let mut per_action_type: HashMap<ActionType, TypeRemaining> = state
            .per_action_type
            .iter()
            .map(|(action_type, &used)| {
                let cap = caps.remove(action_type);
                (action_type.clone(), TypeRemaining::new(cap, used))
            })
            .collect();
        // Capped types with nothing used yet.
        per_action_type.extend(
            caps.into_iter()
                .map(|(action_type, cap)| (action_type, TypeRemaining::new(Some(cap), 0))),
        );

        Ok(BudgetRemaining {
            day,
            daily_cap,
            used: state.total,
            remaining: daily_cap.saturating_sub(state.total),
            per_action_type,
        })
    }

    pub fn remaining(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<BudgetRemaining, BudgetError> {
        self.remaining_at(tenant_id, account_id, Timestamp::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = Timestamp(1_709_294_400);

    struct Fixture {
        ledger: BudgetLedger,
        repo: BudgetRepository,
        tenant: TenantId,
        account: AccountId,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        Fixture {
            ledger: BudgetLedger::new(Arc::clone(&db)),
            repo: BudgetRepository::new(db),
            tenant: TenantId::new("t1"),
            account: AccountId::new("a1"),
        }
    }

    fn note() -> ActionType {
        ActionType::new("CREATE_NOTE")
    }

    #[test]
    fn test_unconfigured_budget_is_not_consumed() {
        let f = fixture();
        assert_eq!(
            f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap(),
            ConsumeOutcome::NotConsumed(BudgetRefusal::NotConfigured)
        );
    }

    #[test]
    fn test_daily_cap() {
        let f = fixture();
        f.repo.set_daily_cap(&f.tenant, &f.account, 2).unwrap();
        for _ in 0..2 {
            assert!(f
                .ledger
                .try_consume_at(&f.tenant, &f.account, &note(), NOW)
                .unwrap()
                .is_consumed());
        }
        assert_eq!(
            f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap(),
            ConsumeOutcome::NotConsumed(BudgetRefusal::DailyCapReached)
        );
    }

    #[test]
    fn test_type_cap_rolls_back_total() {
        let f = fixture();
        f.repo.set_daily_cap(&f.tenant, &f.account, 10).unwrap();
        f.repo.set_type_cap(&f.tenant, &f.account, &note(), 1).unwrap();

        assert!(f
            .ledger
            .try_consume_at(&f.tenant, &f.account, &note(), NOW)
            .unwrap()
            .is_consumed());
        assert_eq!(
            f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap(),
            ConsumeOutcome::NotConsumed(BudgetRefusal::ActionTypeCapReached)
        );

        // The refused attempt left the total where it was.
        let remaining = f.ledger.remaining_at(&f.tenant, &f.account, NOW).unwrap();
        assert_eq!(remaining.used, 1);
        assert_eq!(remaining.remaining, 9);
        assert_eq!(remaining.per_action_type[&note()].remaining, Some(0));

        // Other types still draw from the daily cap.
        assert!(f
            .ledger
            .try_consume_at(&f.tenant, &f.account, &ActionType::new("SEND_EMAIL"), NOW)
            .unwrap()
            .is_consumed());
    }

    #[test]
    fn test_budget_resets_next_day() {
        let f = fixture();
        f.repo.set_daily_cap(&f.tenant, &f.account, 1).unwrap();
        assert!(f
            .ledger
            .try_consume_at(&f.tenant, &f.account, &note(), NOW)
            .unwrap()
            .is_consumed());
        assert!(!f
            .ledger
            .try_consume_at(&f.tenant, &f.account, &note(), NOW)
            .unwrap()
            .is_consumed());
        assert!(f
            .ledger
            .try_consume_at(&f.tenant, &f.account, &note(), NOW.plus_days(1))
            .unwrap()
            .is_consumed());
    }

    #[test]
    fn test_remaining_without_config() {
        let f = fixture();
        let remaining = f.ledger.remaining_at(&f.tenant, &f.account, NOW).unwrap();
        assert_eq!(remaining.daily_cap, 0);
        assert_eq!(remaining.remaining, 0);
        assert_eq!(remaining.day, "2024-03-01");
        assert!(remaining.per_action_type.is_empty());
    }

    #[test]
    fn test_total_never_exceeds_cap_under_contention() {
        let f = fixture();
        f.repo.set_daily_cap(&f.tenant, &f.account, 5).unwrap();
        let ledger = Arc::new(f.ledger);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let (t, a) = (f.tenant.clone(), f.account.clone());
                std::thread::spawn(move || {
                    ledger
                        .try_consume_at(&t, &a, &note(), NOW)
                        .unwrap()
                        .is_consumed()
                })
            })
            .collect();
        let consumed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c)
            .count();
        assert_eq!(consumed, 5);
        assert_eq!(ledger.remaining_at(&f.tenant, &f.account, NOW).unwrap().used, 5);
    }

    #[test]
    fn test_uncapped_types_are_counted_toward_total() {
        let f = fixture();
        let update = ActionType::new("UPDATE_FIELD");
        f.repo.set_daily_cap(&f.tenant, &f.account, 10).unwrap();
        f.repo.set_type_cap(&f.tenant, &f.account, &note(), 1).unwrap();

        assert!(f.ledger.try_consume_at(&f.tenant, &f.account, &update, NOW).unwrap().is_consumed());
        assert!(f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap().is_consumed());
        assert!(!f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap().is_consumed());

        let state = f.repo.load_state(&f.tenant, &f.account, &NOW.day_key()).unwrap();
        assert_eq!(state.total, 2);
        assert_eq!(state.per_action_type.values().sum::<u32>(), state.total);

        let remaining = f.ledger.remaining_at(&f.tenant, &f.account, NOW).unwrap();
        assert_eq!(
            remaining.per_action_type[&update],
            TypeRemaining { cap: None, used: 1, remaining: None }
        );
        assert_eq!(remaining.per_action_type[&note()].remaining, Some(0));
    }

    #[test]
    fn test_refund_returns_unit_to_both_counters() {
        let f = fixture();
        f.repo.set_daily_cap(&f.tenant, &f.account, 1).unwrap();
        assert!(f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap().is_consumed());
        f.ledger.refund_at(&f.tenant, &f.account, &note(), NOW).unwrap();

        let remaining = f.ledger.remaining_at(&f.tenant, &f.account, NOW).unwrap();
        assert_eq!(remaining.used, 0);
        assert_eq!(remaining.per_action_type[&note()].used, 0);
        assert!(f.ledger.try_consume_at(&f.tenant, &f.account, &note(), NOW).unwrap().is_consumed());
    }
}
