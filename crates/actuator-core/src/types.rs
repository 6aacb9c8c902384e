use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Enums
// =============================================================================

/// Risk classification attached to an action intent by the upstream
/// policy engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(RiskLevel::Minimal),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Per-tenant autonomy mode governing whether an action may run unattended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutonomyMode {
    AutoExecute,
    ApprovalRequired,
    ProposeOnly,
    Disabled,
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::AutoExecute => "AUTO_EXECUTE",
            AutonomyMode::ApprovalRequired => "APPROVAL_REQUIRED",
            AutonomyMode::ProposeOnly => "PROPOSE_ONLY",
            AutonomyMode::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutonomyMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO_EXECUTE" => Ok(AutonomyMode::AutoExecute),
            "APPROVAL_REQUIRED" => Ok(AutonomyMode::ApprovalRequired),
            "PROPOSE_ONLY" => Ok(AutonomyMode::ProposeOnly),
            "DISABLED" => Ok(AutonomyMode::Disabled),
            _ => Err(format!("Unknown autonomy mode: {}", s)),
        }
    }
}

/// Who approved an action for execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalSource {
    Policy,
    Human,
}

impl fmt::Display for ApprovalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalSource::Policy => write!(f, "POLICY"),
            ApprovalSource::Human => write!(f, "HUMAN"),
        }
    }
}

/// Health state of a connector's circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Calls blocked until the cooldown deadline.
    Open,
    /// Exactly one probe call permitted.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Reserve/publish status of an auto-executed action.
///
/// RESERVED -> PUBLISHED is the only transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoExecStatus {
    Reserved,
    Published,
}

impl AutoExecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoExecStatus::Reserved => "RESERVED",
            AutoExecStatus::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for AutoExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutoExecStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(AutoExecStatus::Reserved),
            "PUBLISHED" => Ok(AutoExecStatus::Published),
            _ => Err(format!("Unknown auto-exec status: {}", s)),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Identifiers
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Tenant (organisation) identifier.
    TenantId
);
string_id!(
    /// Account identifier within a tenant.
    AccountId
);
string_id!(
    /// Identifier of an action intent produced by the decision layer.
    ActionIntentId
);
string_id!(
    /// Open-ended action type name such as `CREATE_NOTE`.
    ActionType
);
string_id!(
    /// Stable connector identifier derived from a tool name namespace.
    ConnectorId
);

impl ConnectorId {
    /// Derive the connector id from a tool name: everything before the first
    /// dot, or the whole name when it has no namespace.
    pub fn from_tool_name(tool_name: &str) -> Self {
        let namespace = tool_name.split('.').next().unwrap_or(tool_name);
        Self(namespace.to_string())
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn plus_days(&self, days: u32) -> Self {
        self.plus_secs(days as i64 * 86_400)
    }

    /// Seconds from `self` until `later`, zero if `later` is not after `self`.
    pub fn secs_until(&self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0).max(0) as u64
    }

    /// Calendar day in UTC, `YYYY-MM-DD`. Used to key daily budget records.
    pub fn day_key(&self) -> String {
        self.to_datetime().format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// An action proposed by the decision layer, awaiting a gate decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionIntent {
    pub id: ActionIntentId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub action_type: ActionType,
    pub risk_level: RiskLevel,
    pub confidence_score: f64,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ActionIntent {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Reference to an object created or modified in an external system.
///
/// Compensation and audit rely on these existing for every successful
/// side effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalObjectRef {
    pub system: String,
    pub object_type: String,
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_url: Option<String>,
}
