use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ActuatorError, Result};
use crate::types::RiskLevel;

/// Top-level configuration for the Actuator fabric.
///
/// Loaded from `~/.actuator/config.toml` by default. Each section corresponds
/// to one component of the execution fabric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub budget: BudgetDefaults,
    #[serde(default)]
    pub gate: GateConfig,
}

impl ActuatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ActuatorConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ActuatorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.actuator/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Shared conditional-write store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name inside the data directory.
    pub database_file: String,
    /// Retention of reserve/publish records, in days.
    pub auto_exec_ttl_days: u32,
    /// Retention of external-write dedupe records, in days.
    pub dedupe_ttl_days: u32,
    /// Daily budget counters older than this are purged, in days.
    pub budget_retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: "actuator.db".to_string(),
            auto_exec_ttl_days: 90,
            dedupe_ttl_days: 90,
            budget_retention_days: 30,
        }
    }
}

/// Tool invocation executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tool-invocation gateway endpoint.
    pub gateway_url: String,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts including the first (1s, 2s, 4s backoff between them).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub backoff_base_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: u32,
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `retry` (1-based): base * multiplier^(retry-1).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = (self.backoff_multiplier.max(1) as u64)
            .saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8080/tools/invoke".to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2,
        }
    }
}

/// Circuit breaker thresholds, shared by every connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,
    /// Sliding failure window width in seconds.
    pub window_secs: u64,
    /// Time the circuit stays open before a probe is allowed, in seconds.
    pub cooldown_secs: u64,
    /// Idle retention of breaker state, in days (clamped to 7..=30).
    pub state_ttl_days: u32,
}

impl CircuitBreakerConfig {
    pub fn effective_ttl_days(&self) -> u32 {
        self.state_ttl_days.clamp(7, 30)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
            state_ttl_days: 7,
        }
    }
}

/// Per-connector concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Default maximum in-flight calls per connector.
    pub max_in_flight: u32,
    /// Per-connector overrides keyed by connector id.
    pub per_connector: HashMap<String, u32>,
    /// Retry-after hint returned when no slot is free, in seconds.
    pub retry_after_secs: u64,
}

impl ConcurrencyConfig {
    pub fn max_for(&self, connector_id: &str) -> u32 {
        self.per_connector
            .get(connector_id)
            .copied()
            .unwrap_or(self.max_in_flight)
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            per_connector: HashMap::new(),
            retry_after_secs: 2,
        }
    }
}

/// Budget values applied by the CLI when seeding a tenant without explicit
/// caps. At execution time only stored budget config is consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetDefaults {
    pub max_autonomous_per_day: u32,
    pub max_per_action_type: u32,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            max_autonomous_per_day: 50,
            max_per_action_type: 20,
        }
    }
}

/// Auto-approval policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum confidence score for unattended execution.
    pub min_confidence: f64,
    /// Risk levels eligible for unattended execution.
    pub auto_risk_levels: Vec<RiskLevel>,
    /// Poll interval, in milliseconds, while another evaluation holds an
    /// uncommitted reservation for the same intent.
    pub claim_poll_ms: u64,
    /// An uncommitted reservation untouched for this long may be taken over.
    pub claim_stale_secs: u64,
}

impl GateConfig {
    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_millis(self.claim_poll_ms.max(1))
    }

    /// How long a waiting evaluation keeps polling. Long enough for a
    /// stalled holder's claim to turn stale and be taken over.
    pub fn claim_wait(&self) -> Duration {
        Duration::from_secs(self.claim_stale_secs + 1)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            auto_risk_levels: vec![RiskLevel::Minimal, RiskLevel::Low],
            claim_poll_ms: 25,
            claim_stale_secs: 60,
        }
    }
}
