//! Request and outcome types for the gate and the executor.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use actuator_core::types::{
    AccountId, ActionIntentId, CircuitState, ConnectorId, ExternalObjectRef, TenantId,
};

// =============================================================================
// Gate
// =============================================================================

/// Input to the auto-approval gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRequest {
    pub action_intent_id: ActionIntentId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateResult {
    AutoExecuted,
    RequireApproval,
}

/// Why an action was routed to a human.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateReason {
    IntentNotFound,
    IntentExpired,
    ActionTypeNotAllowlisted,
    AutonomyDisabled,
    ProposeOnly,
    ApprovalRequired,
    RiskTooHigh,
    ConfidenceTooLow,
    BudgetExceeded,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::IntentNotFound => "INTENT_NOT_FOUND",
            GateReason::IntentExpired => "INTENT_EXPIRED",
            GateReason::ActionTypeNotAllowlisted => "ACTION_TYPE_NOT_ALLOWLISTED",
            GateReason::AutonomyDisabled => "AUTONOMY_DISABLED",
            GateReason::ProposeOnly => "PROPOSE_ONLY",
            GateReason::ApprovalRequired => "APPROVAL_REQUIRED",
            GateReason::RiskTooHigh => "RISK_TOO_HIGH",
            GateReason::ConfidenceTooLow => "CONFIDENCE_TOO_LOW",
            GateReason::BudgetExceeded => "BUDGET_EXCEEDED",
        }
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the auto-approval gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub result: GateResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<GateReason>,
    pub action_intent_id: ActionIntentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_published: Option<bool>,
}

impl GateOutcome {
    pub fn auto_executed(action_intent_id: ActionIntentId, already_published: bool) -> Self {
        Self {
            result: GateResult::AutoExecuted,
            reason: None,
            action_intent_id,
            already_published: Some(already_published),
        }
    }

    pub fn require_approval(action_intent_id: ActionIntentId, reason: GateReason) -> Self {
        Self {
            result: GateResult::RequireApproval,
            reason: Some(reason),
            action_intent_id,
            already_published: None,
        }
    }

    pub fn is_auto_executed(&self) -> bool {
        self.result == GateResult::AutoExecuted
    }
}

/// Result of publishing a human approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanApprovalOutcome {
    pub action_intent_id: ActionIntentId,
    pub already_published: bool,
}

// =============================================================================
// Executor
// =============================================================================

/// One request to run a tool against a connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub tool_arguments: serde_json::Value,
    pub idempotency_key: String,
    pub action_intent_id: ActionIntentId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub trace_id: String,
    pub attempt_count: u32,
}

impl ToolInvocation {
    pub fn connector_id(&self) -> ConnectorId {
        ConnectorId::from_tool_name(&self.tool_name)
    }

    /// Deterministic reference for this invocation attempt.
    pub fn tool_run_ref(&self) -> String {
        tool_run_ref(&self.trace_id, self.attempt_count, &self.tool_name)
    }
}

/// Derive a tool run reference from `(trace_id, attempt_count, tool_name)`.
///
/// The same triple always yields the same reference.
pub fn tool_run_ref(trace_id: &str, attempt_count: u32, tool_name: &str) -> String {
    let name = format!("{}\u{1f}{}\u{1f}{}", trace_id, attempt_count, tool_name);
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    format!("run-{}", id.simple())
}

/// Closed set of business failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Auth,
    RateLimit,
    Validation,
    Timeout,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Auth => "AUTH",
            ErrorClass::RateLimit => "RATE_LIMIT",
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::Unknown => "UNKNOWN",
        }
    }

    /// Failures another attempt may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Timeout | ErrorClass::RateLimit)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of a tool run that reached the connector (or was
/// replayed from the idempotency store).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_object_refs: Vec<ExternalObjectRef>,
    pub tool_run_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Refs came from the idempotency store; no connector call was made.
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeferReason {
    ConcurrencyLimit,
    CircuitOpen,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            DeferReason::CircuitOpen => "CIRCUIT_OPEN",
        }
    }
}

/// The call was not attempted; try again after `retry_after`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deferral {
    pub reason: DeferReason,
    pub retry_after: Duration,
    /// Breaker state when the deferral came from the breaker.
    pub circuit_state: Option<CircuitState>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InvocationOutcome {
    Completed(ToolRunResult),
    Deferred(Deferral),
}

impl InvocationOutcome {
    pub fn completed(&self) -> Option<&ToolRunResult> {
        match self {
            InvocationOutcome::Completed(result) => Some(result),
            InvocationOutcome::Deferred(_) => None,
        }
    }

    pub fn deferral(&self) -> Option<&Deferral> {
        match self {
            InvocationOutcome::Deferred(deferral) => Some(deferral),
            InvocationOutcome::Completed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_run_ref_is_deterministic() {
        let a = tool_run_ref("trace-1", 1, "crm.create_note");
        let b = tool_run_ref("trace-1", 1, "crm.create_note");
        assert_eq!(a, b);
        assert!(a.starts_with("run-"));
        assert_ne!(a, tool_run_ref("trace-1", 2, "crm.create_note"));
        assert_ne!(a, tool_run_ref("trace-2", 1, "crm.create_note"));
        assert_ne!(a, tool_run_ref("trace-1", 1, "crm.update_note"));
    }

    #[test]
    fn test_tool_run_ref_fields_do_not_bleed() {
        assert_ne!(tool_run_ref("a", 11, "x"), tool_run_ref("a1", 1, "x"));
    }

    #[test]
    fn test_gate_outcome_serialization() {
        let out = GateOutcome::require_approval("ai-1".into(), GateReason::BudgetExceeded);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["result"], "REQUIRE_APPROVAL");
        assert_eq!(json["reason"], "BUDGET_EXCEEDED");
        assert!(json.get("already_published").is_none());

        let out = GateOutcome::auto_executed("ai-1".into(), true);
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["result"], "AUTO_EXECUTED");
        assert_eq!(json["already_published"], true);
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_gate_reason_strings_match_serde() {
        for reason in [
            GateReason::IntentNotFound,
            GateReason::ActionTypeNotAllowlisted,
            GateReason::ConfidenceTooLow,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_invocation_connector_id() {
        let inv = ToolInvocation {
            tool_name: "crm.create_note".to_string(),
            tool_arguments: serde_json::json!({}),
            idempotency_key: "k".to_string(),
            action_intent_id: "ai-1".into(),
            tenant_id: "t1".into(),
            account_id: "a1".into(),
            trace_id: "trace".to_string(),
            attempt_count: 1,
        };
        assert_eq!(inv.connector_id().as_str(), "crm");
        assert_eq!(inv.tool_run_ref(), tool_run_ref("trace", 1, "crm.create_note"));
    }
}
