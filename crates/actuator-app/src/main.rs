//! Actuator application binary - composition root.
//!
//! Ties the Actuator crates into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the SQLite store
//! 4. Build the gate, budget ledger, breaker and executor
//! 5. Run the requested subcommand and print its result as JSON

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};

use actuator_action::{
    AuditLog, AutoApprovalGate, BudgetLedger, CircuitBreaker, ConnectorRegistry, GateRequest,
    HttpToolTransport, InvocationOutcome, OutboxPublisher, StaticToken, ToolExecutor,
    ToolInvocation, ToolTransport,
};
use actuator_core::config::ActuatorConfig;
use actuator_core::types::{
    AccountId, ActionIntent, ActionType, AutonomyMode, ConnectorId, RiskLevel, TenantId,
    Timestamp,
};
use actuator_storage::{purge_expired, BudgetRepository, Database, GovernanceRepository, IntentRepository};

use cli::{BudgetCommand, CliArgs, Command, IntentRef, InvokeArgs, PolicyCommand};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

fn gate_request(target: &IntentRef) -> GateRequest {
    GateRequest {
        action_intent_id: target.intent_id.as_str().into(),
        tenant_id: target.tenant.as_str().into(),
        account_id: target.account.as_str().into(),
    }
}

fn print_json(value: &Value) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn register_intent(
    db: &Arc<Database>,
    target: &IntentRef,
    action_type: &str,
    risk: &str,
    confidence: f64,
    expires_in: Option<i64>,
) -> AppResult<Value> {
    let now = Timestamp::now();
    let intent = ActionIntent {
        id: target.intent_id.as_str().into(),
        tenant_id: target.tenant.as_str().into(),
        account_id: target.account.as_str().into(),
        action_type: ActionType::new(action_type),
        risk_level: risk.parse::<RiskLevel>()?,
        confidence_score: confidence,
        expires_at: expires_in.map(|secs| now.plus_secs(secs)),
        created_at: now,
    };
    IntentRepository::new(Arc::clone(db)).save(&intent)?;
    tracing::info!(action_intent_id = %intent.id, "Action intent registered");
    Ok(serde_json::to_value(&intent)?)
}

async fn invoke(db: &Arc<Database>, config: &ActuatorConfig, args: InvokeArgs) -> AppResult<Value> {
    let transport: Arc<dyn ToolTransport> = if args.gateway {
        let token = args.token.clone().unwrap_or_default();
        Arc::new(HttpToolTransport::new(
            config.executor.gateway_url.clone(),
            config.executor.timeout(),
            Arc::new(StaticToken::new(token)),
        )?)
    } else {
        Arc::new(ConnectorRegistry::with_defaults(
            Arc::clone(db),
            config.store.dedupe_ttl_days,
        ))
    };
    let executor = ToolExecutor::new(Arc::clone(db), transport, config);

    let invocation = ToolInvocation {
        tool_name: args.tool,
        tool_arguments: serde_json::from_str(&args.arguments)?,
        idempotency_key: args.idempotency_key,
        action_intent_id: args.intent.into(),
        tenant_id: args.tenant.into(),
        account_id: args.account.into(),
        trace_id: args
            .trace_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        attempt_count: args.attempt,
    };

    Ok(match executor.invoke(&invocation).await? {
        InvocationOutcome::Completed(result) => serde_json::to_value(&result)?,
        InvocationOutcome::Deferred(deferral) => json!({
            "deferred": true,
            "reason": deferral.reason,
            "retry_after_ms": deferral.retry_after.as_millis() as u64,
            "circuit_state": deferral.circuit_state,
        }),
    })
}

fn policy(db: &Arc<Database>, command: PolicyCommand) -> AppResult<Value> {
    let repo = GovernanceRepository::new(Arc::clone(db));
    match command {
        PolicyCommand::Allow {
            tenant,
            account,
            types,
        } => {
            let account = account.map(AccountId::from);
            let types: Vec<ActionType> = types.into_iter().map(ActionType::from).collect();
            repo.set_allow_list(&TenantId::from(tenant.as_str()), account.as_ref(), &types)?;
            Ok(json!({"tenant_id": tenant, "account_id": account, "allowed": types}))
        }
        PolicyCommand::Mode {
            tenant,
            account,
            action_type,
            mode,
        } => {
            let mode = mode.parse::<AutonomyMode>()?;
            let account = account.map(AccountId::from);
            let action_type = action_type.map(ActionType::from);
            repo.set_autonomy_mode(
                &TenantId::from(tenant.as_str()),
                account.as_ref(),
                action_type.as_ref(),
                mode,
            )?;
            Ok(json!({
                "tenant_id": tenant,
                "account_id": account,
                "action_type": action_type,
                "mode": mode,
            }))
        }
    }
}

fn budget(db: &Arc<Database>, config: &ActuatorConfig, command: BudgetCommand) -> AppResult<Value> {
    let repo = BudgetRepository::new(Arc::clone(db));
    match command {
        BudgetCommand::Show { tenant, account } => {
            let remaining = BudgetLedger::new(Arc::clone(db))
                .remaining(&tenant.as_str().into(), &account.as_str().into())?;
            Ok(serde_json::to_value(&remaining)?)
        }
        BudgetCommand::SetDaily {
            tenant,
            account,
            cap,
        } => {
            let cap = cap.unwrap_or(config.budget.max_autonomous_per_day);
            repo.set_daily_cap(&tenant.as_str().into(), &account.as_str().into(), cap)?;
            Ok(json!({"tenant_id": tenant, "account_id": account, "max_autonomous_per_day": cap}))
        }
        BudgetCommand::SetType {
            tenant,
            account,
            action_type,
            cap,
        } => {
            let cap = cap.unwrap_or(config.budget.max_per_action_type);
            repo.set_type_cap(
                &tenant.as_str().into(),
                &account.as_str().into(),
                &ActionType::new(action_type.as_str()),
                cap,
            )?;
            Ok(json!({
                "tenant_id": tenant,
                "account_id": account,
                "action_type": action_type,
                "max_per_action_type": cap,
            }))
        }
    }
}

fn init_config(path: &Path, force: bool) -> AppResult<Value> {
    if path.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", path.display()).into());
    }
    ActuatorConfig::default().save(path)?;
    Ok(json!({"config": path.display().to_string()}))
}

async fn run(args: CliArgs, config: ActuatorConfig, db: Arc<Database>) -> AppResult<Value> {
    let gate = || {
        AutoApprovalGate::new(
            Arc::clone(&db),
            Arc::new(OutboxPublisher::new(Arc::clone(&db))),
            config.gate.clone(),
            config.store.auto_exec_ttl_days,
        )
    };
    let config_file = args.resolve_config_path();

    match args.command {
        Command::Init { force } => init_config(&config_file, force),
        Command::Intent {
            target,
            action_type,
            risk,
            confidence,
            expires_in,
        } => register_intent(&db, &target, &action_type, &risk, confidence, expires_in),
        Command::Gate { target } => {
            let outcome = gate().evaluate(&gate_request(&target)).await?;
            Ok(serde_json::to_value(&outcome)?)
        }
        Command::Approve { target } => {
            let outcome = gate().publish_human_approval(&gate_request(&target)).await?;
            Ok(serde_json::to_value(&outcome)?)
        }
        Command::Invoke(invoke_args) => invoke(&db, &config, invoke_args).await,
        Command::Policy(command) => policy(&db, command),
        Command::Budget(command) => budget(&db, &config, command),
        Command::Breaker { connector } => {
            let breaker = CircuitBreaker::new(Arc::clone(&db), &config.circuit_breaker);
            let state = breaker.state_at(&ConnectorId::new(connector.as_str()), Timestamp::now())?;
            Ok(json!({
                "connector_id": connector,
                "state": state.kind(),
                "detail": format!("{:?}", state),
            }))
        }
        Command::Purge => {
            let result = purge_expired(&db, Timestamp::now(), config.store.budget_retention_days)?;
            Ok(json!({
                "breakers_deleted": result.breakers_deleted,
                "auto_exec_deleted": result.auto_exec_deleted,
                "dedupe_deleted": result.dedupe_deleted,
                "budget_rows_deleted": result.budget_rows_deleted,
                "total": result.total(),
            }))
        }
        Command::Audit { kind, limit } => {
            let rows = AuditLog::new(Arc::clone(&db)).recent(kind.as_deref(), limit)?;
            Ok(Value::Array(
                rows.into_iter()
                    .map(|row| {
                        json!({
                            "id": row.id,
                            "kind": row.kind,
                            "created_at": row.created_at.to_datetime().to_rfc3339(),
                            "payload": row.payload,
                        })
                    })
                    .collect(),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = ActuatorConfig::load_or_default(&config_file);

    // Tracing. RUST_LOG wins over the configured level.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(&config.store.database_file);
    let db = Arc::new(Database::new(&db_path)?);

    let output = run(args, config, db).await?;
    print_json(&output)
}
