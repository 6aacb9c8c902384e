//! Autonomy budget configuration and daily consumption counters.
//!
//! Configuration rows are written by administrators. Daily state rows are
//! created lazily by the first consumption of the day and are only ever
//! changed by bounded single-statement increments and decrements.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{AccountId, ActionType, TenantId};

use crate::db::{sql_err, Database};

/// Budget limits for one (tenant, account).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetConfigRecord {
    pub max_autonomous_per_day: u32,
    /// Per-action-type caps. A type with no entry is bounded only by the
    /// daily cap.
    pub max_per_action_type: HashMap<ActionType, u32>,
}

/// Consumption recorded for one (tenant, account, day).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetStateRecord {
    pub total: u32,
    pub per_action_type: HashMap<ActionType, u32>,
}

/// Repository for autonomy budgets.
pub struct BudgetRepository {
    db: Arc<Database>,
}

impl BudgetRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Set (or replace) the daily cap for an account.
    pub fn set_daily_cap(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        max_per_day: u32,
    ) -> Result<(), ActuatorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO budget_config (tenant_id, account_id, max_autonomous_per_day)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant_id, account_id)
                 DO UPDATE SET max_autonomous_per_day = excluded.max_autonomous_per_day",
                rusqlite::params![tenant_id.as_str(), account_id.as_str(), max_per_day as i64],
            )
            .map_err(sql_err("Failed to save budget config"))?;
            Ok(())
        })
    }

    /// Set (or replace) the cap for one action type.
    pub fn set_type_cap(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
        max_count: u32,
    ) -> Result<(), ActuatorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO budget_type_caps (tenant_id, account_id, action_type, max_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, account_id, action_type)
                 DO UPDATE SET max_count = excluded.max_count",
                rusqlite::params![
                    tenant_id.as_str(),
                    account_id.as_str(),
                    action_type.as_str(),
                    max_count as i64
                ],
            )
            .map_err(sql_err("Failed to save action type cap"))?;
            Ok(())
        })
    }

    /// Load the account's budget configuration, if any.
    pub fn load_config(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
    ) -> Result<Option<BudgetConfigRecord>, ActuatorError> {
        self.db.with_conn(|conn| {
            let max: Option<i64> = conn
                .query_row(
                    "SELECT max_autonomous_per_day FROM budget_config
                     WHERE tenant_id = ?1 AND account_id = ?2",
                    rusqlite::params![tenant_id.as_str(), account_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("Failed to load budget config"))?;

            let Some(max) = max else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT action_type, max_count FROM budget_type_caps
                     WHERE tenant_id = ?1 AND account_id = ?2",
                )
                .map_err(sql_err("Failed to prepare type caps query"))?;
            let caps = stmt
                .query_map(
                    rusqlite::params![tenant_id.as_str(), account_id.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .map_err(sql_err("Failed to load type caps"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read type cap row"))?;

            Ok(Some(BudgetConfigRecord {
                max_autonomous_per_day: max.max(0) as u32,
                max_per_action_type: caps
                    .into_iter()
                    .map(|(t, m)| (ActionType(t), m.max(0) as u32))
                    .collect(),
            }))
        })
    }

    /// Increment the day's total if it is below `max`.
    pub fn try_increment_total(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        day: &str,
        max: u32,
    ) -> Result<bool, ActuatorError> {
        if max == 0 {
            return Ok(false);
        }
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO budget_state (tenant_id, account_id, day, total)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT (tenant_id, account_id, day)
                     DO UPDATE SET total = total + 1
                     WHERE budget_state.total < ?4",
                    rusqlite::params![tenant_id.as_str(), account_id.as_str(), day, max as i64],
                )
                .map_err(sql_err("Failed to increment budget total"))?;
            Ok(changed == 1)
        })
    }

    /// Increment the day's count for one action type if it is below `max`.
    /// `None` means the type has no cap of its own; the count still moves
    /// so that the total stays equal to the sum of the type counts.
    pub fn try_increment_type(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        day: &str,
        action_type: &ActionType,
        max: Option<u32>,
    ) -> Result<bool, ActuatorError> {
        if max == Some(0) {
            return Ok(false);
        }
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO budget_counts (tenant_id, account_id, day, action_type, count)
                     VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT (tenant_id, account_id, day, action_type)
                     DO UPDATE SET count = count + 1
                     WHERE ?5 IS NULL OR budget_counts.count < ?5",
                    rusqlite::params![
                        tenant_id.as_str(),
                        account_id.as_str(),
                        day,
                        action_type.as_str(),
                        max.map(i64::from)
                    ],
                )
                .map_err(sql_err("Failed to increment action type count"))?;
            Ok(changed == 1)
        })
    }

    /// Undo one total increment. Never drives the total below zero.
    pub fn decrement_total(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        day: &str,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE budget_state SET total = total - 1
                     WHERE tenant_id = ?1 AND account_id = ?2 AND day = ?3 AND total > 0",
                    rusqlite::params![tenant_id.as_str(), account_id.as_str(), day],
                )
                .map_err(sql_err("Failed to roll back budget total"))?;
            Ok(changed == 1)
        })
    }

    /// Undo one action type increment. Never drives the count below zero.
    pub fn decrement_type(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        day: &str,
        action_type: &ActionType,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE budget_counts SET count = count - 1
                     WHERE tenant_id = ?1 AND account_id = ?2 AND day = ?3
                       AND action_type = ?4 AND count > 0",
                    rusqlite::params![
                        tenant_id.as_str(),
                        account_id.as_str(),
                        day,
                        action_type.as_str()
                    ],
                )
                .map_err(sql_err("Failed to roll back action type count"))?;
            Ok(changed == 1)
        })
    }

    /// Read the day's consumption. Missing rows read as zero.
    pub fn load_state(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        day: &str,
    ) -> Result<BudgetStateRecord, ActuatorError> {
        self.db.with_conn(|conn| {
            let total: Option<i64> = conn
                .query_row(
                    "SELECT total FROM budget_state
                     WHERE tenant_id = ?1 AND account_id = ?2 AND day = ?3",
                    rusqlite::params![tenant_id.as_str(), account_id.as_str(), day],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("Failed to load budget state"))?;

            let mut stmt = conn
                .prepare(
                    "SELECT action_type, count FROM budget_counts
                     WHERE tenant_id = ?1 AND account_id = ?2 AND day = ?3",
                )
                .map_err(sql_err("Failed to prepare budget counts query"))?;
            let counts = stmt
                .query_map(
                    rusqlite::params![tenant_id.as_str(), account_id.as_str(), day],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .map_err(sql_err("Failed to load budget counts"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read budget count row"))?;

            Ok(BudgetStateRecord {
                total: total.unwrap_or(0).max(0) as u32,
                per_action_type: counts
                    .into_iter()
                    .map(|(t, c)| (ActionType(t), c.max(0) as u32))
                    .collect(),
            })
        })
    }

    /// Delete daily state for days strictly before `day`.
    pub fn purge_before(&self, day: &str) -> Result<u64, ActuatorError> {
        self.db.with_conn(|conn| {
            let totals = conn
                .execute("DELETE FROM budget_state WHERE day < ?1", rusqlite::params![day])
                .map_err(sql_err("Failed to purge budget state"))?;
            let counts = conn
                .execute("DELETE FROM budget_counts WHERE day < ?1", rusqlite::params![day])
                .map_err(sql_err("Failed to purge budget counts"))?;
            Ok((totals + counts) as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: &str = "2024-03-01";

    fn setup() -> (BudgetRepository, TenantId, AccountId) {
        let repo = BudgetRepository::new(Arc::new(Database::in_memory().unwrap()));
        (repo, TenantId::new("t1"), AccountId::new("a1"))
    }

    #[test]
    fn test_missing_config_is_none() {
        let (repo, t, a) = setup();
        assert!(repo.load_config(&t, &a).unwrap().is_none());
    }

    #[test]
    fn test_config_roundtrip_with_type_caps() {
        let (repo, t, a) = setup();
        repo.set_daily_cap(&t, &a, 10).unwrap();
        repo.set_type_cap(&t, &a, &ActionType::new("CREATE_NOTE"), 3)
            .unwrap();
        let cfg = repo.load_config(&t, &a).unwrap().unwrap();
        assert_eq!(cfg.max_autonomous_per_day, 10);
        assert_eq!(
            cfg.max_per_action_type.get(&ActionType::new("CREATE_NOTE")),
            Some(&3)
        );

        repo.set_daily_cap(&t, &a, 4).unwrap();
        assert_eq!(repo.load_config(&t, &a).unwrap().unwrap().max_autonomous_per_day, 4);
    }

    #[test]
    fn test_total_increment_is_bounded() {
        let (repo, t, a) = setup();
        assert!(repo.try_increment_total(&t, &a, DAY, 2).unwrap());
        assert!(repo.try_increment_total(&t, &a, DAY, 2).unwrap());
        assert!(!repo.try_increment_total(&t, &a, DAY, 2).unwrap());
        assert_eq!(repo.load_state(&t, &a, DAY).unwrap().total, 2);
    }

    #[test]
    fn test_zero_cap_never_increments() {
        let (repo, t, a) = setup();
        assert!(!repo.try_increment_total(&t, &a, DAY, 0).unwrap());
        assert_eq!(repo.load_state(&t, &a, DAY).unwrap().total, 0);
    }

    #[test]
    fn test_type_increment_is_bounded() {
        let (repo, t, a) = setup();
        let note = ActionType::new("CREATE_NOTE");
        assert!(repo.try_increment_type(&t, &a, DAY, &note, Some(1)).unwrap());
        assert!(!repo.try_increment_type(&t, &a, DAY, &note, Some(1)).unwrap());
        let state = repo.load_state(&t, &a, DAY).unwrap();
        assert_eq!(state.per_action_type.get(&note), Some(&1));
    }

    #[test]
    fn test_uncapped_type_still_counts() {
        let (repo, t, a) = setup();
        let update = ActionType::new("UPDATE_FIELD");
        for _ in 0..3 {
            assert!(repo.try_increment_type(&t, &a, DAY, &update, None).unwrap());
        }
        assert!(repo.decrement_type(&t, &a, DAY, &update).unwrap());
        let state = repo.load_state(&t, &a, DAY).unwrap();
        assert_eq!(state.per_action_type.get(&update), Some(&2));
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let (repo, t, a) = setup();
        assert!(!repo.decrement_total(&t, &a, DAY).unwrap());
        repo.try_increment_total(&t, &a, DAY, 5).unwrap();
        assert!(repo.decrement_total(&t, &a, DAY).unwrap());
        assert!(!repo.decrement_total(&t, &a, DAY).unwrap());
        assert_eq!(repo.load_state(&t, &a, DAY).unwrap().total, 0);
    }

    #[test]
    fn test_days_are_independent() {
        let (repo, t, a) = setup();
        assert!(repo.try_increment_total(&t, &a, DAY, 1).unwrap());
        assert!(!repo.try_increment_total(&t, &a, DAY, 1).unwrap());
        assert!(repo.try_increment_total(&t, &a, "2024-03-02", 1).unwrap());
    }

    #[test]
    fn test_purge_before_day() {
        let (repo, t, a) = setup();
        repo.try_increment_total(&t, &a, "2024-02-28", 5).unwrap();
        repo.try_increment_total(&t, &a, DAY, 5).unwrap();
        assert_eq!(repo.purge_before(DAY).unwrap(), 1);
        assert_eq!(repo.load_state(&t, &a, DAY).unwrap().total, 1);
        assert_eq!(repo.load_state(&t, &a, "2024-02-28").unwrap().total, 0);
    }
}
