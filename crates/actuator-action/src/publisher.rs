//! Approved-action publishing and the audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use actuator_core::error::ActuatorError;
use actuator_core::events::{ApprovedActionSignal, DomainEvent};
use actuator_core::types::{ActionIntentId, Timestamp};
use actuator_storage::{AuditRow, Database, OutboxRepository};

/// Destination for approved-action signals.
///
/// Implementations must tolerate the same signal being published more than
/// once; the gate re-publishes after a crash between publish and
/// mark-published.
#[async_trait]
pub trait ApprovalPublisher: Send + Sync {
    /// Publish the signal. Returns `true` if it was newly published and
    /// `false` if an identical signal was already out.
    async fn publish(&self, signal: &ApprovedActionSignal) -> Result<bool, ActuatorError>;
}

/// Publishes into the durable outbox table, at most one row per intent.
pub struct OutboxPublisher {
    repo: OutboxRepository,
}

impl OutboxPublisher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: OutboxRepository::new(db),
        }
    }

    /// Outbox key for an intent's approval.
    pub fn event_key(action_intent_id: &ActionIntentId) -> String {
        format!("{}:{}", ApprovedActionSignal::EVENT_TYPE, action_intent_id)
    }
}

#[async_trait]
impl ApprovalPublisher for OutboxPublisher {
    async fn publish(&self, signal: &ApprovedActionSignal) -> Result<bool, ActuatorError> {
        let key = Self::event_key(&signal.action_intent_id);
        let payload = serde_json::to_value(signal)?;
        let created = self.repo.insert_if_absent(
            &key,
            ApprovedActionSignal::EVENT_TYPE,
            &payload,
            Timestamp::now(),
        )?;
        debug!(event_key = %key, created, "Approved-action signal written to outbox");
        Ok(created)
    }
}

/// Append-only log of domain events.
///
/// Recording is best-effort: a failed append is logged and never fails the
/// operation being audited.
pub struct AuditLog {
    repo: OutboxRepository,
}

impl AuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: OutboxRepository::new(db),
        }
    }

    pub fn record(&self, event: &DomainEvent) {
        let result = serde_json::to_value(event)
            .map_err(ActuatorError::from)
            .and_then(|payload| self.repo.append_audit(event.kind(), &payload, event.timestamp()));
        if let Err(e) = result {
            warn!(kind = event.kind(), error = %e, "Failed to append audit event");
        }
    }

    /// Most recent events, newest first.
    pub fn recent(&self, kind: Option<&str>, limit: u32) -> Result<Vec<AuditRow>, ActuatorError> {
        self.repo.recent_audit(kind, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actuator_core::types::ApprovalSource;

    fn signal() -> ApprovedActionSignal {
        ApprovedActionSignal {
            action_intent_id: "ai-1".into(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            approval_source: ApprovalSource::Policy,
            auto_executed: true,
        }
    }

    #[tokio::test]
    async fn test_outbox_publish_is_idempotent() {
        let db = Arc::new(Database::in_memory().unwrap());
        let publisher = OutboxPublisher::new(Arc::clone(&db));
        assert!(publisher.publish(&signal()).await.unwrap());
        assert!(!publisher.publish(&signal()).await.unwrap());

        let repo = OutboxRepository::new(db);
        let pending = repo.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_key, "action.approved:ai-1");
        assert_eq!(pending[0].payload["approval_source"], "POLICY");
    }

    #[test]
    fn test_audit_log_records_events() {
        let db = Arc::new(Database::in_memory().unwrap());
        let audit = AuditLog::new(db);
        audit.record(&DomainEvent::HumanApprovalPublished {
            action_intent_id: "ai-1".into(),
            timestamp: Timestamp(5),
        });
        let rows = audit.recent(Some("human_approval_published"), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload["action_intent_id"], "ai-1");
        assert_eq!(rows[0].created_at, Timestamp(5));
    }
}
