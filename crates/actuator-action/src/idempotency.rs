//! Idempotency store for external writes.
//!
//! Before a side-effecting call the executor looks up the invocation's
//! idempotency key. A live record means the side effect already happened
//! and its refs are returned instead of calling the connector again.

use std::sync::Arc;

use tracing::{debug, info};

use actuator_core::error::ActuatorError;
use actuator_core::types::{ActionIntentId, ExternalObjectRef, Timestamp};
use actuator_storage::{Database, DedupeRecord, DedupeRepository};

pub struct IdempotencyStore {
    repo: DedupeRepository,
    ttl_days: u32,
}

impl IdempotencyStore {
    pub fn new(db: Arc<Database>, ttl_days: u32) -> Self {
        Self {
            repo: DedupeRepository::new(db),
            ttl_days,
        }
    }

    /// Refs recorded for the key, if a live record exists.
    pub fn check(&self, idempotency_key: &str) -> Result<Option<Vec<ExternalObjectRef>>, ActuatorError> {
        self.check_at(idempotency_key, Timestamp::now())
    }

    pub fn check_at(
        &self,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Result<Option<Vec<ExternalObjectRef>>, ActuatorError> {
        let found = self.repo.find(idempotency_key, now)?;
        if found.is_some() {
            debug!(idempotency_key, "Dedupe record hit");
        }
        Ok(found.map(|r| r.external_object_refs))
    }

    pub fn record(
        &self,
        idempotency_key: &str,
        refs: &[ExternalObjectRef],
        action_intent_id: &ActionIntentId,
        tool_name: &str,
    ) -> Result<Vec<ExternalObjectRef>, ActuatorError> {
        self.record_at(idempotency_key, refs, action_intent_id, tool_name, Timestamp::now())
    }

    /// Record the refs of a completed side effect.
    ///
    /// Write-once: if another writer got there first its refs win and are
    /// returned, so every caller reports the same objects.
    pub fn record_at(
        &self,
        idempotency_key: &str,
        refs: &[ExternalObjectRef],
        action_intent_id: &ActionIntentId,
        tool_name: &str,
        now: Timestamp,
    ) -> Result<Vec<ExternalObjectRef>, ActuatorError> {
        let record = DedupeRecord {
            idempotency_key: idempotency_key.to_string(),
            external_object_refs: refs.to_vec(),
            action_intent_id: action_intent_id.clone(),
            tool_name: tool_name.to_string(),
            created_at: now,
            expires_at: now.plus_days(self.ttl_days),
        };
        if self.repo.insert_if_absent(&record)? {
            return Ok(record.external_object_refs);
        }

        match self.repo.find(idempotency_key, now)? {
            Some(existing) => {
                info!(
                    idempotency_key,
                    tool_name, "Dedupe record already written by another invocation"
                );
                Ok(existing.external_object_refs)
            }
            None => Err(ActuatorError::Storage(format!(
                "Dedupe record for {} neither written nor readable",
                idempotency_key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = Timestamp(1_709_294_400);

    fn note_ref(id: &str) -> ExternalObjectRef {
        ExternalObjectRef {
            system: "internal".to_string(),
            object_type: "note".to_string(),
            object_id: id.to_string(),
            object_url: None,
        }
    }

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(Database::in_memory().unwrap()), 90)
    }

    #[test]
    fn test_miss_then_hit() {
        let store = store();
        let intent = ActionIntentId::new("ai-1");
        assert!(store.check_at("k1", NOW).unwrap().is_none());

        let refs = store
            .record_at("k1", &[note_ref("n-1")], &intent, "internal.create_note", NOW)
            .unwrap();
        assert_eq!(refs, vec![note_ref("n-1")]);
        assert_eq!(store.check_at("k1", NOW).unwrap(), Some(vec![note_ref("n-1")]));
    }

    #[test]
    fn test_first_writer_wins() {
        let store = store();
        let intent = ActionIntentId::new("ai-1");
        store
            .record_at("k1", &[note_ref("n-1")], &intent, "internal.create_note", NOW)
            .unwrap();
        let refs = store
            .record_at("k1", &[note_ref("n-2")], &intent, "internal.create_note", NOW)
            .unwrap();
        assert_eq!(refs, vec![note_ref("n-1")]);
    }

    #[test]
    fn test_record_expires_after_ttl() {
        let store = store();
        let intent = ActionIntentId::new("ai-1");
        store
            .record_at("k1", &[note_ref("n-1")], &intent, "internal.create_note", NOW)
            .unwrap();
        let later = NOW.plus_days(90);
        assert!(store.check_at("k1", later).unwrap().is_none());

        // An expired record is replaced by a new write.
        let refs = store
            .record_at("k1", &[note_ref("n-2")], &intent, "internal.create_note", later)
            .unwrap();
        assert_eq!(refs, vec![note_ref("n-2")]);
    }
}
