//! Records created by the internal-note connector.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{AccountId, ActionIntentId, TenantId, Timestamp};

use crate::db::{sql_err, Database};

#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    pub id: String,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub body: String,
    pub action_intent_id: ActionIntentId,
    pub created_at: Timestamp,
}

pub struct NoteRepository {
    db: Arc<Database>,
}

impl NoteRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, note: &NoteRecord) -> Result<(), ActuatorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO internal_notes
                    (id, tenant_id, account_id, body, action_intent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    note.id,
                    note.tenant_id.as_str(),
                    note.account_id.as_str(),
                    note.body,
                    note.action_intent_id.as_str(),
                    note.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert note"))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<NoteRecord>, ActuatorError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, tenant_id, account_id, body, action_intent_id, created_at
                 FROM internal_notes WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(NoteRecord {
                        id: row.get(0)?,
                        tenant_id: TenantId(row.get(1)?),
                        account_id: AccountId(row.get(2)?),
                        body: row.get(3)?,
                        action_intent_id: ActionIntentId(row.get(4)?),
                        created_at: Timestamp(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(sql_err("Failed to load note"))
        })
    }

    /// Number of notes written for an action intent.
    pub fn count_for_intent(&self, action_intent_id: &ActionIntentId) -> Result<u64, ActuatorError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM internal_notes WHERE action_intent_id = ?1",
                    rusqlite::params![action_intent_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(sql_err("Failed to count notes"))?;
            Ok(count.max(0) as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_count() {
        let repo = NoteRepository::new(Arc::new(Database::in_memory().unwrap()));
        let note = NoteRecord {
            id: "n-1".to_string(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            body: "Follow up next week".to_string(),
            action_intent_id: "ai-1".into(),
            created_at: Timestamp(5),
        };
        repo.insert(&note).unwrap();
        assert_eq!(repo.find_by_id("n-1").unwrap(), Some(note));
        assert_eq!(repo.count_for_intent(&"ai-1".into()).unwrap(), 1);
        assert_eq!(repo.count_for_intent(&"ai-2".into()).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let repo = NoteRepository::new(Arc::new(Database::in_memory().unwrap()));
        let note = NoteRecord {
            id: "n-1".to_string(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            body: "x".to_string(),
            action_intent_id: "ai-1".into(),
            created_at: Timestamp(5),
        };
        repo.insert(&note).unwrap();
        assert!(repo.insert(&note).is_err());
    }
}
