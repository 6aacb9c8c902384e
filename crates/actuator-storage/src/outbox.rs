//! Durable outbox for approved-action events and the append-only audit log.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::Timestamp;

use crate::db::{sql_err, Database};

/// One outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub event_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
}

/// One audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

/// Repository for outbox and audit records.
pub struct OutboxRepository {
    db: Arc<Database>,
}

impl OutboxRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Enqueue an event unless one with the same key already exists.
    ///
    /// Returns `true` if this call wrote it.
    pub fn insert_if_absent(
        &self,
        event_key: &str,
        event_type: &str,
        payload: &serde_json::Value,
        now: Timestamp,
    ) -> Result<bool, ActuatorError> {
        let payload = serde_json::to_string(payload)?;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT INTO outbox_events (event_key, event_type, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (event_key) DO NOTHING",
                    rusqlite::params![event_key, event_type, payload, now.0],
                )
                .map_err(sql_err("Failed to enqueue outbox event"))?;
            Ok(changed == 1)
        })
    }

    pub fn find(&self, event_key: &str) -> Result<Option<OutboxEvent>, ActuatorError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT event_key, event_type, payload, created_at, delivered_at
                     FROM outbox_events WHERE event_key = ?1",
                    rusqlite::params![event_key],
                    row_to_outbox,
                )
                .optional()
                .map_err(sql_err("Failed to load outbox event"))?;
            row.map(parse_outbox).transpose()
        })
    }

    /// Undelivered events, oldest first.
    pub fn pending(&self, limit: u32) -> Result<Vec<OutboxEvent>, ActuatorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT event_key, event_type, payload, created_at, delivered_at
                     FROM outbox_events
                     WHERE delivered_at IS NULL
                     ORDER BY created_at ASC
                     LIMIT ?1",
                )
                .map_err(sql_err("Failed to prepare outbox query"))?;
            let rows = stmt
                .query_map(rusqlite::params![limit as i64], row_to_outbox)
                .map_err(sql_err("Failed to query outbox"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read outbox row"))?;
            rows.into_iter().map(parse_outbox).collect()
        })
    }

    /// Mark an event delivered. Returns `false` if it was already delivered.
    pub fn mark_delivered(&self, event_key: &str, now: Timestamp) -> Result<bool, ActuatorError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE outbox_events SET delivered_at = ?2
                     WHERE event_key = ?1 AND delivered_at IS NULL",
                    rusqlite::params![event_key, now.0],
                )
                .map_err(sql_err("Failed to mark outbox event delivered"))?;
            Ok(changed == 1)
        })
    }

    /// Append an audit entry and return its id.
    pub fn append_audit(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        now: Timestamp,
    ) -> Result<i64, ActuatorError> {
        let payload = serde_json::to_string(payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_events (kind, payload, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![kind, payload, now.0],
            )
            .map_err(sql_err("Failed to append audit event"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent audit entries, newest first, optionally of one kind.
    pub fn recent_audit(
        &self,
        kind: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditRow>, ActuatorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, kind, payload, created_at FROM audit_events
                     WHERE ?1 IS NULL OR kind = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )
                .map_err(sql_err("Failed to prepare audit query"))?;
            let rows = stmt
                .query_map(rusqlite::params![kind, limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(sql_err("Failed to query audit log"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read audit row"))?;

            rows.into_iter()
                .map(|(id, kind, payload, created)| -> Result<AuditRow, ActuatorError> {
                    Ok(AuditRow {
                        id,
                        kind,
                        payload: serde_json::from_str(&payload)?,
                        created_at: Timestamp(created),
                    })
                })
                .collect()
        })
    }
}

type RawOutboxRow = (String, String, String, i64, Option<i64>);

fn row_to_outbox(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutboxRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn parse_outbox(raw: RawOutboxRow) -> Result<OutboxEvent, ActuatorError> {
    let (event_key, event_type, payload, created, delivered) = raw;
    Ok(OutboxEvent {
        event_key,
        event_type,
        payload: serde_json::from_str(&payload)?,
        created_at: Timestamp(created),
        delivered_at: delivered.map(Timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> OutboxRepository {
        OutboxRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_outbox_key_is_unique() {
        let repo = repo();
        let payload = json!({"action_intent_id": "ai-1"});
        assert!(repo
            .insert_if_absent("action.approved:ai-1", "action.approved", &payload, Timestamp(1))
            .unwrap());
        assert!(!repo
            .insert_if_absent("action.approved:ai-1", "action.approved", &payload, Timestamp(2))
            .unwrap());

        let stored = repo.find("action.approved:ai-1").unwrap().unwrap();
        assert_eq!(stored.created_at, Timestamp(1));
        assert_eq!(stored.payload, payload);
    }

    #[test]
    fn test_pending_and_delivery() {
        let repo = repo();
        repo.insert_if_absent("k2", "t", &json!({}), Timestamp(2)).unwrap();
        repo.insert_if_absent("k1", "t", &json!({}), Timestamp(1)).unwrap();

        let pending = repo.pending(10).unwrap();
        assert_eq!(
            pending.iter().map(|e| e.event_key.as_str()).collect::<Vec<_>>(),
            vec!["k1", "k2"]
        );

        assert!(repo.mark_delivered("k1", Timestamp(3)).unwrap());
        assert!(!repo.mark_delivered("k1", Timestamp(4)).unwrap());
        assert_eq!(repo.pending(10).unwrap().len(), 1);
    }

    #[test]
    fn test_audit_filter_and_order() {
        let repo = repo();
        repo.append_audit("a", &json!({"n": 1}), Timestamp(1)).unwrap();
        repo.append_audit("b", &json!({"n": 2}), Timestamp(2)).unwrap();
        repo.append_audit("a", &json!({"n": 3}), Timestamp(3)).unwrap();

        let all = repo.recent_audit(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].payload["n"], 3);

        let only_a = repo.recent_audit(Some("a"), 10).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.kind == "a"));
    }
}
