//! Write-once records of external side effects, keyed by idempotency key.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{ActionIntentId, ExternalObjectRef, Timestamp};

use crate::db::{sql_err, Database};

#[derive(Debug, Clone, PartialEq)]
pub struct DedupeRecord {
    pub idempotency_key: String,
    pub external_object_refs: Vec<ExternalObjectRef>,
    pub action_intent_id: ActionIntentId,
    pub tool_name: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Repository for external-write dedupe records.
pub struct DedupeRepository {
    db: Arc<Database>,
}

impl DedupeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a live record for the key.
    pub fn find(
        &self,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Result<Option<DedupeRecord>, ActuatorError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT external_object_refs, action_intent_id, tool_name, created_at, expires_at
                     FROM dedupe_records
                     WHERE idempotency_key = ?1 AND expires_at > ?2",
                    rusqlite::params![idempotency_key, now.0],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err("Failed to load dedupe record"))?;

            let Some((refs, intent, tool_name, created, expires)) = row else {
                return Ok(None);
            };

            Ok(Some(DedupeRecord {
                idempotency_key: idempotency_key.to_string(),
                external_object_refs: serde_json::from_str(&refs)?,
                action_intent_id: ActionIntentId(intent),
                tool_name,
                created_at: Timestamp(created),
                expires_at: Timestamp(expires),
            }))
        })
    }

    /// Insert the record unless a live one exists for the key.
    ///
    /// Returns `true` if this call wrote it. A losing writer must read the
    /// existing record back rather than overwrite it.
    pub fn insert_if_absent(&self, record: &DedupeRecord) -> Result<bool, ActuatorError> {
        let refs = serde_json::to_string(&record.external_object_refs)?;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO dedupe_records
                        (idempotency_key, external_object_refs, action_intent_id, tool_name,
                         created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (idempotency_key) DO UPDATE SET
                        external_object_refs = excluded.external_object_refs,
                        action_intent_id = excluded.action_intent_id,
                        tool_name = excluded.tool_name,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at
                     WHERE dedupe_records.expires_at <= excluded.created_at",
                    rusqlite::params![
                        record.idempotency_key,
                        refs,
                        record.action_intent_id.as_str(),
                        record.tool_name,
                        record.created_at.0,
                        record.expires_at.0,
                    ],
                )
                .map_err(sql_err("Failed to write dedupe record"))?;
            Ok(changed == 1)
        })
    }

    pub fn purge_expired(&self, now: Timestamp) -> Result<u64, ActuatorError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM dedupe_records WHERE expires_at <= ?1",
                    rusqlite::params![now.0],
                )
                .map_err(sql_err("Failed to purge dedupe records"))?;
            Ok(removed as u64)
        })
    }
}
