//! Circuit breaker state persistence.
//!
//! Rows are only ever changed through `insert_if_absent` and
//! `compare_and_set`, both guarded by the row's `version`.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{CircuitState, ConnectorId, Timestamp};

use crate::db::{sql_err, Database};

/// One connector's breaker record as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerRecord {
    pub connector_id: ConnectorId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub window_start: Option<Timestamp>,
    pub open_until: Option<Timestamp>,
    pub probe_in_flight: bool,
    /// Optimistic-concurrency version; bumped by every successful write.
    pub version: i64,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

impl BreakerRecord {
    /// A fresh CLOSED record that has never been written.
    pub fn closed(connector_id: ConnectorId, now: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            connector_id,
            state: CircuitState::Closed,
            failure_count: 0,
            window_start: None,
            open_until: None,
            probe_in_flight: false,
            version: 0,
            updated_at: now,
            expires_at,
        }
    }
}

/// Repository for per-connector breaker state.
pub struct BreakerRepository {
    db: Arc<Database>,
}

impl BreakerRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load a connector's record. Rows past their TTL read as absent.
    pub fn load(
        &self,
        connector_id: &ConnectorId,
        now: Timestamp,
    ) -> Result<Option<BreakerRecord>, ActuatorError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT connector_id, state, failure_count, window_start, open_until,
                            probe_in_flight, version, updated_at, expires_at
                     FROM circuit_breakers
                     WHERE connector_id = ?1 AND expires_at > ?2",
                    rusqlite::params![connector_id.as_str(), now.0],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                            row.get::<_, i64>(7)?,
                            row.get::<_, i64>(8)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err("Failed to load breaker state"))?;

            let Some((id, state, failures, window, open_until, probe, version, updated, expires)) =
                row
            else {
                return Ok(None);
            };

            let state = state
                .parse::<CircuitState>()
                .map_err(ActuatorError::Storage)?;

            Ok(Some(BreakerRecord {
                connector_id: ConnectorId(id),
                state,
                failure_count: failures.max(0) as u32,
                window_start: window.map(Timestamp),
                open_until: open_until.map(Timestamp),
                probe_in_flight: probe != 0,
                version,
                updated_at: Timestamp(updated),
                expires_at: Timestamp(expires),
            }))
        })
    }

    /// Create the record if no live row exists for the connector.
    ///
    /// An expired row is replaced. Returns `true` if this call wrote it.
    pub fn insert_if_absent(&self, record: &BreakerRecord) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO circuit_breakers
                        (connector_id, state, failure_count, window_start, open_until,
                         probe_in_flight, version, updated_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)
                     ON CONFLICT (connector_id) DO UPDATE SET
                        state = excluded.state,
                        failure_count = excluded.failure_count,
                        window_start = excluded.window_start,
                        open_until = excluded.open_until,
                        probe_in_flight = excluded.probe_in_flight,
                        version = circuit_breakers.version + 1,
                        updated_at = excluded.updated_at,
                        expires_at = excluded.expires_at
                     WHERE circuit_breakers.expires_at <= excluded.updated_at",
                    rusqlite::params![
                        record.connector_id.as_str(),
                        record.state.as_str(),
                        record.failure_count as i64,
                        record.window_start.map(|t| t.0),
                        record.open_until.map(|t| t.0),
                        record.probe_in_flight as i64,
                        record.updated_at.0,
                        record.expires_at.0,
                    ],
                )
                .map_err(sql_err("Failed to insert breaker state"))?;
            Ok(changed == 1)
        })
    }

    /// Write `next` only if the stored version still equals `expected_version`.
    ///
    /// Returns `false` when another writer got there first.
    pub fn compare_and_set(
        &self,
        next: &BreakerRecord,
        expected_version: i64,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE circuit_breakers SET
                        state = ?2,
                        failure_count = ?3,
                        window_start = ?4,
                        open_until = ?5,
                        probe_in_flight = ?6,
                        version = version + 1,
                        updated_at = ?7,
                        expires_at = ?8
                     WHERE connector_id = ?1 AND version = ?9",
                    rusqlite::params![
                        next.connector_id.as_str(),
                        next.state.as_str(),
                        next.failure_count as i64,
                        next.window_start.map(|t| t.0),
                        next.open_until.map(|t| t.0),
                        next.probe_in_flight as i64,
                        next.updated_at.0,
                        next.expires_at.0,
                        expected_version,
                    ],
                )
                .map_err(sql_err("Failed to update breaker state"))?;
            Ok(changed == 1)
        })
    }

    /// Delete rows past their TTL. Returns the number removed.
    pub fn purge_expired(&self, now: Timestamp) -> Result<u64, ActuatorError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM circuit_breakers WHERE expires_at <= ?1",
                    rusqlite::params![now.0],
                )
                .map_err(sql_err("Failed to purge breaker state"))?;
            Ok(removed as u64)
        })
    }
}
