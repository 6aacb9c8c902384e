use serde::{Deserialize, Serialize};

use crate::types::{
    AccountId, ActionIntentId, ActionType, ApprovalSource, ConnectorId, TenantId, Timestamp,
};

/// Durable signal telling the execution layer an action may run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovedActionSignal {
    pub action_intent_id: ActionIntentId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub approval_source: ApprovalSource,
    pub auto_executed: bool,
}

impl ApprovedActionSignal {
    /// Event-type name used as the outbox key prefix.
    pub const EVENT_TYPE: &'static str = "action.approved";
}

/// Domain events emitted by the execution fabric.
///
/// Events are appended to the audit log and explain, after the fact, why an
/// action ran or did not run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Gate Events
    // =========================================================================
    /// The gate approved an action for unattended execution.
    ActionAutoApproved {
        action_intent_id: ActionIntentId,
        action_type: ActionType,
        already_published: bool,
        timestamp: Timestamp,
    },

    /// The gate routed an action to a human.
    ApprovalRequired {
        action_intent_id: ActionIntentId,
        reason: String,
        timestamp: Timestamp,
    },

    /// A human approval was published.
    HumanApprovalPublished {
        action_intent_id: ActionIntentId,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Connector Health Events
    // =========================================================================
    /// A connector's circuit changed state.
    CircuitStateChanged {
        connector_id: ConnectorId,
        from: String,
        to: String,
        timestamp: Timestamp,
    },

    /// An invocation was deferred by backpressure or an open circuit.
    InvocationDeferred {
        connector_id: ConnectorId,
        tool_name: String,
        reason: String,
        retry_after_secs: u64,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Invocation Events
    // =========================================================================
    /// A tool invocation reached a final outcome.
    InvocationCompleted {
        tool_run_ref: String,
        tool_name: String,
        action_intent_id: ActionIntentId,
        success: bool,
        error_class: Option<String>,
        attempts: u32,
        timestamp: Timestamp,
    },

    /// A side effect was skipped because its idempotency key was already
    /// recorded.
    InvocationReplayed {
        idempotency_key: String,
        tool_name: String,
        timestamp: Timestamp,
    },
}

impl DomainEvent {
    /// Short machine-readable name of the event variant.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ActionAutoApproved { .. } => "action_auto_approved",
            DomainEvent::ApprovalRequired { .. } => "approval_required",
            DomainEvent::HumanApprovalPublished { .. } => "human_approval_published",
            DomainEvent::CircuitStateChanged { .. } => "circuit_state_changed",
            DomainEvent::InvocationDeferred { .. } => "invocation_deferred",
            DomainEvent::InvocationCompleted { .. } => "invocation_completed",
            DomainEvent::InvocationReplayed { .. } => "invocation_replayed",
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::ActionAutoApproved { timestamp, .. }
            | DomainEvent::ApprovalRequired { timestamp, .. }
            | DomainEvent::HumanApprovalPublished { timestamp, .. }
            | DomainEvent::CircuitStateChanged { timestamp, .. }
            | DomainEvent::InvocationDeferred { timestamp, .. }
            | DomainEvent::InvocationCompleted { timestamp, .. }
            | DomainEvent::InvocationReplayed { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_serialization_shape() {
        let signal = ApprovedActionSignal {
            action_intent_id: "ai-1".into(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            approval_source: ApprovalSource::Policy,
            auto_executed: true,
        };
        let json: serde_json::Value = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["action_intent_id"], "ai-1");
        assert_eq!(json["approval_source"], "POLICY");
        assert_eq!(json["auto_executed"], true);
    }

    #[test]
    fn test_domain_event_tagged_serialization() {
        let event = DomainEvent::ApprovalRequired {
            action_intent_id: "ai-2".into(),
            reason: "BUDGET_EXCEEDED".to_string(),
            timestamp: Timestamp(42),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "approval_required");
        assert_eq!(json["reason"], "BUDGET_EXCEEDED");
        assert_eq!(event.kind(), "approval_required");
        assert_eq!(event.timestamp(), Timestamp(42));
    }
}
