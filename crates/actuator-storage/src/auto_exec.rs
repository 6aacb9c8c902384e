//! Reserve/publish state per action intent.
//!
//! A row moves through three observable stages:
//! RESERVED (uncommitted claim) -> RESERVED (committed) -> PUBLISHED.
//! Each step is a conditional single-statement write. The holder of an
//! uncommitted claim is identified by a claim token; a takeover replaces the
//! token, so a displaced holder can neither commit nor release.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{ActionIntentId, AutoExecStatus, Timestamp};

use crate::db::{sql_err, Database};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoExecRecord {
    pub action_intent_id: ActionIntentId,
    pub status: AutoExecStatus,
    /// The holder of the reservation has cleared the action to publish.
    pub committed: bool,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Repository for reserve/publish state.
pub struct AutoExecRepository {
    db: Arc<Database>,
}

impl AutoExecRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn load(
        &self,
        id: &ActionIntentId,
        now: Timestamp,
    ) -> Result<Option<AutoExecRecord>, ActuatorError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT status, committed, updated_at, expires_at FROM auto_exec_state
                     WHERE action_intent_id = ?1 AND expires_at > ?2",
                    rusqlite::params![id.as_str(), now.0],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err("Failed to load auto-exec state"))?;

            match row {
                Some((status, committed, updated, expires)) => Ok(Some(AutoExecRecord {
                    action_intent_id: id.clone(),
                    status: status
                        .parse::<AutoExecStatus>()
                        .map_err(ActuatorError::Storage)?,
                    committed: committed != 0,
                    updated_at: Timestamp(updated),
                    expires_at: Timestamp(expires),
                })),
                None => Ok(None),
            }
        })
    }

    /// Create an uncommitted RESERVED row if none is live.
    ///
    /// Returns `true` if this call holds the reservation.
    pub fn try_reserve(
        &self,
        id: &ActionIntentId,
        claim_token: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO auto_exec_state
                        (action_intent_id, status, committed, claim_token, updated_at, expires_at)
                     VALUES (?1, 'RESERVED', 0, ?2, ?3, ?4)
                     ON CONFLICT (action_intent_id) DO UPDATE SET
                        status = 'RESERVED',
                        committed = 0,
                        claim_token = excluded.claim_token,
                        updated_at = excluded.updated_at,
                        expires_at = excluded.expires_at
                     WHERE auto_exec_state.expires_at <= excluded.updated_at",
                    rusqlite::params![id.as_str(), claim_token, now.0, expires_at.0],
                )
                .map_err(sql_err("Failed to reserve auto-exec state"))?;
            Ok(changed == 1)
        })
    }

    /// Take over an uncommitted reservation last touched at or before
    /// `stale_before`, installing `claim_token` as the new holder.
    /// Returns `true` for the single winner.
    pub fn take_over_stale(
        &self,
        id: &ActionIntentId,
        claim_token: &str,
        stale_before: Timestamp,
        now: Timestamp,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE auto_exec_state SET updated_at = ?3, claim_token = ?4
                     WHERE action_intent_id = ?1 AND status = 'RESERVED'
                       AND committed = 0 AND updated_at <= ?2",
                    rusqlite::params![id.as_str(), stale_before.0, now.0, claim_token],
                )
                .map_err(sql_err("Failed to take over reservation"))?;
            Ok(changed == 1)
        })
    }

    /// Mark an uncommitted reservation as cleared for publishing. Only the
    /// current token holder can commit.
    pub fn commit(
        &self,
        id: &ActionIntentId,
        claim_token: &str,
        now: Timestamp,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE auto_exec_state SET committed = 1, updated_at = ?2
                     WHERE action_intent_id = ?1 AND status = 'RESERVED'
                       AND committed = 0 AND claim_token = ?3",
                    rusqlite::params![id.as_str(), now.0, claim_token],
                )
                .map_err(sql_err("Failed to commit reservation"))?;
            Ok(changed == 1)
        })
    }

    /// Drop an uncommitted reservation so a later evaluation can start over.
    pub fn release(&self, id: &ActionIntentId, claim_token: &str) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM auto_exec_state
                     WHERE action_intent_id = ?1 AND status = 'RESERVED'
                       AND committed = 0 AND claim_token = ?2",
                    rusqlite::params![id.as_str(), claim_token],
                )
                .map_err(sql_err("Failed to release reservation"))?;
            Ok(changed == 1)
        })
    }

    /// RESERVED (committed) -> PUBLISHED. Returns `false` if the row was not
    /// in that state, including when it is already PUBLISHED.
    pub fn mark_published(
        &self,
        id: &ActionIntentId,
        now: Timestamp,
    ) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE auto_exec_state SET status = 'PUBLISHED', updated_at = ?2
                     WHERE action_intent_id = ?1 AND status = 'RESERVED' AND committed = 1",
                    rusqlite::params![id.as_str(), now.0],
                )
                .map_err(sql_err("Failed to mark auto-exec state published"))?;
            Ok(changed == 1)
        })
    }

    pub fn purge_expired(&self, now: Timestamp) -> Result<u64, ActuatorError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM auto_exec_state WHERE expires_at <= ?1",
                    rusqlite::params![now.0],
                )
                .map_err(sql_err("Failed to purge auto-exec state"))?;
            Ok(removed as u64)
        })
    }
}
