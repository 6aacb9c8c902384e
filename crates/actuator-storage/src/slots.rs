//! Per-connector in-flight counters backing the concurrency limiter.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{ConnectorId, Timestamp};

use crate::db::{sql_err, Database};

/// Repository for the distributed semaphore rows.
pub struct SlotRepository {
    db: Arc<Database>,
}

impl SlotRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Increment the connector's in-flight count if it is below `max`.
    ///
    /// The row is created on first use. Returns `true` if a slot was taken.
    pub fn try_acquire(
        &self,
        connector_id: &ConnectorId,
        max: u32,
        now: Timestamp,
    ) -> Result<bool, ActuatorError> {
        if max == 0 {
            return Ok(false);
        }
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO concurrency_slots (connector_id, in_flight, updated_at)
                     VALUES (?1, 1, ?3)
                     ON CONFLICT (connector_id) DO UPDATE SET
                        in_flight = in_flight + 1,
                        updated_at = excluded.updated_at
                     WHERE concurrency_slots.in_flight < ?2",
                    rusqlite::params![connector_id.as_str(), max as i64, now.0],
                )
                .map_err(sql_err("Failed to acquire concurrency slot"))?;
            Ok(changed == 1)
        })
    }

    /// Decrement the in-flight count, never below zero.
    ///
    /// Returns `false` if the count was already zero.
    pub fn release(&self, connector_id: &ConnectorId, now: Timestamp) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE concurrency_slots
                     SET in_flight = in_flight - 1, updated_at = ?2
                     WHERE connector_id = ?1 AND in_flight > 0",
                    rusqlite::params![connector_id.as_str(), now.0],
                )
                .map_err(sql_err("Failed to release concurrency slot"))?;
            Ok(changed == 1)
        })
    }

    /// Current in-flight count; zero when the connector has no row.
    pub fn in_flight(&self, connector_id: &ConnectorId) -> Result<u32, ActuatorError> {
        self.db.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT in_flight FROM concurrency_slots WHERE connector_id = ?1",
                    rusqlite::params![connector_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("Failed to read concurrency slot"))?;
            Ok(count.unwrap_or(0).max(0) as u32)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SlotRepository {
        SlotRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_acquire_up_to_max() {
        let repo = repo();
        let crm = ConnectorId::new("crm");
        assert!(repo.try_acquire(&crm, 2, Timestamp(1)).unwrap());
        assert!(repo.try_acquire(&crm, 2, Timestamp(1)).unwrap());
        assert!(!repo.try_acquire(&crm, 2, Timestamp(1)).unwrap());
        assert_eq!(repo.in_flight(&crm).unwrap(), 2);
    }

    #[test]
    fn test_zero_max_never_admits() {
        let repo = repo();
        assert!(!repo.try_acquire(&ConnectorId::new("crm"), 0, Timestamp(1)).unwrap());
    }

    #[test]
    fn test_release_frees_slot() {
        let repo = repo();
        let crm = ConnectorId::new("crm");
        assert!(repo.try_acquire(&crm, 1, Timestamp(1)).unwrap());
        assert!(repo.release(&crm, Timestamp(2)).unwrap());
        assert!(repo.try_acquire(&crm, 1, Timestamp(3)).unwrap());
    }

    #[test]
    fn test_release_never_goes_negative() {
        let repo = repo();
        let crm = ConnectorId::new("crm");
        assert!(!repo.release(&crm, Timestamp(1)).unwrap());
        repo.try_acquire(&crm, 1, Timestamp(1)).unwrap();
        assert!(repo.release(&crm, Timestamp(2)).unwrap());
        assert!(!repo.release(&crm, Timestamp(3)).unwrap());
        assert_eq!(repo.in_flight(&crm).unwrap(), 0);
    }

    #[test]
    fn test_connectors_are_independent() {
        let repo = repo();
        let crm = ConnectorId::new("crm");
        let mail = ConnectorId::new("mail");
        assert!(repo.try_acquire(&crm, 1, Timestamp(1)).unwrap());
        assert!(repo.try_acquire(&mail, 1, Timestamp(1)).unwrap());
        assert!(!repo.try_acquire(&crm, 1, Timestamp(1)).unwrap());
    }
}
