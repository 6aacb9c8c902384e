//! CLI argument definitions for the Actuator application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Actuator: gate, budget and run approved actions against connectors.
#[derive(Parser, Debug)]
#[command(name = "actuator", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite store.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Tenant, account and intent addressed by a gate command.
#[derive(Args, Debug, Clone)]
pub struct IntentRef {
    /// Action intent id.
    pub intent_id: String,
    #[arg(long)]
    pub tenant: String,
    #[arg(long)]
    pub account: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Register an action intent proposed by the decision layer.
    Intent {
        #[command(flatten)]
        target: IntentRef,
        /// Action type, e.g. CREATE_NOTE.
        #[arg(long = "type")]
        action_type: String,
        /// MINIMAL, LOW, MEDIUM, HIGH or CRITICAL.
        #[arg(long, default_value = "LOW")]
        risk: String,
        #[arg(long, default_value_t = 0.0)]
        confidence: f64,
        /// Expiry in seconds from now.
        #[arg(long)]
        expires_in: Option<i64>,
    },

    /// Run an intent through the auto-approval gate.
    Gate {
        #[command(flatten)]
        target: IntentRef,
    },

    /// Publish a human approval for an intent.
    Approve {
        #[command(flatten)]
        target: IntentRef,
    },

    /// Invoke a tool through the resilient executor.
    Invoke(InvokeArgs),

    /// Allow lists and autonomy modes.
    #[command(subcommand)]
    Policy(PolicyCommand),

    /// Autonomy budgets.
    #[command(subcommand)]
    Budget(BudgetCommand),

    /// Show a connector's circuit breaker state.
    Breaker {
        connector: String,
    },

    /// Delete expired breaker, reserve/publish, dedupe and budget records.
    Purge,

    /// Show recent audit events.
    Audit {
        /// Only events of this kind, e.g. approval_required.
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Tool name, e.g. internal.create_note.
    pub tool: String,
    /// Tool arguments as a JSON object.
    #[arg(long, default_value = "{}")]
    pub arguments: String,
    #[arg(long)]
    pub idempotency_key: String,
    #[arg(long)]
    pub intent: String,
    #[arg(long)]
    pub tenant: String,
    #[arg(long)]
    pub account: String,
    /// Trace id; a fresh one is generated when omitted.
    #[arg(long)]
    pub trace_id: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub attempt: u32,
    /// Send through the configured HTTP gateway instead of in-process
    /// connectors.
    #[arg(long)]
    pub gateway: bool,
    /// Bearer token for the gateway.
    #[arg(long, env = "ACTUATOR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Replace an allow list (tenant level unless --account is given).
    Allow {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        account: Option<String>,
        /// Allowed action types.
        #[arg(required = true)]
        types: Vec<String>,
    },
    /// Set an autonomy mode; omit --account or --type for the wider scope.
    Mode {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        account: Option<String>,
        #[arg(long = "type")]
        action_type: Option<String>,
        /// AUTO_EXECUTE, APPROVAL_REQUIRED, PROPOSE_ONLY or DISABLED.
        mode: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BudgetCommand {
    /// Remaining units for today.
    Show {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        account: String,
    },
    /// Set the daily cap; defaults to the configured value.
    SetDaily {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        account: String,
        cap: Option<u32>,
    },
    /// Set a per-action-type cap; defaults to the configured value.
    SetType {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        account: String,
        #[arg(long = "type")]
        action_type: String,
        cap: Option<u32>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > ACTUATOR_CONFIG env var > ~/.actuator/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("ACTUATOR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > ACTUATOR_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config_value: &str) -> PathBuf {
        if let Some(ref p) = self.data_dir {
            return p.clone();
        }
        if let Ok(p) = std::env::var("ACTUATOR_DATA_DIR") {
            return PathBuf::from(p);
        }
        expand_home(config_value)
    }

    /// Resolve the log level: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_value: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_value.to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".actuator").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
