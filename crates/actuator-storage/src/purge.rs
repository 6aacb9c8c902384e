//! Retention sweep over TTL-bearing records.

use std::sync::Arc;

use tracing::info;

use actuator_core::error::ActuatorError;
use actuator_core::types::Timestamp;

use crate::auto_exec::AutoExecRepository;
use crate::breaker::BreakerRepository;
use crate::budget::BudgetRepository;
use crate::db::Database;
use crate::dedupe::DedupeRepository;

/// Rows removed by one purge cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeResult {
    pub breakers_deleted: u64,
    pub auto_exec_deleted: u64,
    pub dedupe_deleted: u64,
    /// Daily budget rows older than the retention window.
    pub budget_rows_deleted: u64,
}

impl PurgeResult {
    pub fn total(&self) -> u64 {
        self.breakers_deleted + self.auto_exec_deleted + self.dedupe_deleted + self.budget_rows_deleted
    }
}

/// Delete every expired row as of `now`, plus daily budget state older
/// than `budget_retention_days`.
pub fn purge_expired(
    db: &Arc<Database>,
    now: Timestamp,
    budget_retention_days: u32,
) -> Result<PurgeResult, ActuatorError> {
    let cutoff_day = now.plus_secs(-(budget_retention_days as i64) * 86_400).day_key();

    let result = PurgeResult {
        breakers_deleted: BreakerRepository::new(Arc::clone(db)).purge_expired(now)?,
        auto_exec_deleted: AutoExecRepository::new(Arc::clone(db)).purge_expired(now)?,
        dedupe_deleted: DedupeRepository::new(Arc::clone(db)).purge_expired(now)?,
        budget_rows_deleted: BudgetRepository::new(Arc::clone(db)).purge_before(&cutoff_day)?,
    };

    info!(
        breakers = result.breakers_deleted,
        auto_exec = result.auto_exec_deleted,
        dedupe = result.dedupe_deleted,
        budget_rows = result.budget_rows_deleted,
        "Purge complete"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actuator_core::types::{AccountId, ActionIntentId, ConnectorId, TenantId};

    use crate::breaker::BreakerRecord;

    #[test]
    fn test_purge_sweeps_every_table() {
        let db = Arc::new(Database::in_memory().unwrap());
        let now = Timestamp(1_709_294_400); // 2024-03-01

        BreakerRepository::new(Arc::clone(&db))
            .insert_if_absent(&BreakerRecord::closed(
                ConnectorId::new("crm"),
                Timestamp(0),
                Timestamp(10),
            ))
            .unwrap();
        AutoExecRepository::new(Arc::clone(&db))
            .try_reserve(&ActionIntentId::new("ai-1"), "c1", Timestamp(0), Timestamp(10))
            .unwrap();
        let budget = BudgetRepository::new(Arc::clone(&db));
        let (t, a) = (TenantId::new("t1"), AccountId::new("a1"));
        budget.try_increment_total(&t, &a, "2024-01-01", 5).unwrap();
        budget.try_increment_total(&t, &a, "2024-03-01", 5).unwrap();

        let result = purge_expired(&db, now, 30).unwrap();
        assert_eq!(result.breakers_deleted, 1);
        assert_eq!(result.auto_exec_deleted, 1);
        assert_eq!(result.dedupe_deleted, 0);
        assert_eq!(result.budget_rows_deleted, 1);
        assert_eq!(result.total(), 3);
        assert_eq!(budget.load_state(&t, &a, "2024-03-01").unwrap().total, 1);
    }
}
