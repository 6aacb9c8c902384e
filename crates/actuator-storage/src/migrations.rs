//! Database schema migrations.
//!
//! Applies the schema for every record the execution fabric coordinates
//! through: breaker state, concurrency slots, reserve/publish state,
//! autonomy budgets, dedupe records, governance config, intents, the
//! approved-action outbox and the audit log.

use rusqlite::Connection;
use tracing::info;

use actuator_core::error::ActuatorError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ActuatorError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ActuatorError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ActuatorError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: execution_fabric");
    }

    Ok(())
}

/// Version 1: execution fabric schema.
fn apply_v1(conn: &Connection) -> Result<(), ActuatorError> {
    conn.execute_batch(
        "
        -- Per-connector circuit breaker state. `version` backs compare-and-set.
        CREATE TABLE IF NOT EXISTS circuit_breakers (
            connector_id     TEXT PRIMARY KEY NOT NULL,
            state            TEXT NOT NULL
                             CHECK (state IN ('CLOSED', 'OPEN', 'HALF_OPEN')),
            failure_count    INTEGER NOT NULL DEFAULT 0,
            window_start     INTEGER,
            open_until       INTEGER,
            probe_in_flight  INTEGER NOT NULL DEFAULT 0,
            version          INTEGER NOT NULL DEFAULT 0,
            updated_at       INTEGER NOT NULL,
            expires_at       INTEGER NOT NULL
        );

        -- Distributed semaphore per connector.
        CREATE TABLE IF NOT EXISTS concurrency_slots (
            connector_id  TEXT PRIMARY KEY NOT NULL,
            in_flight     INTEGER NOT NULL DEFAULT 0 CHECK (in_flight >= 0),
            updated_at    INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Reserve/publish guard per action intent. `committed` is set once
        -- the reservation holder has cleared the action for publishing.
        CREATE TABLE IF NOT EXISTS auto_exec_state (
            action_intent_id  TEXT PRIMARY KEY NOT NULL,
            status            TEXT NOT NULL
                              CHECK (status IN ('RESERVED', 'PUBLISHED')),
            committed         INTEGER NOT NULL DEFAULT 0,
            claim_token       TEXT NOT NULL,
            updated_at        INTEGER NOT NULL,
            expires_at        INTEGER NOT NULL
        );

        -- Autonomy budget configuration (admin-written).
        CREATE TABLE IF NOT EXISTS budget_config (
            tenant_id               TEXT NOT NULL,
            account_id              TEXT NOT NULL,
            max_autonomous_per_day  INTEGER NOT NULL CHECK (max_autonomous_per_day >= 0),
            PRIMARY KEY (tenant_id, account_id)
        );

        CREATE TABLE IF NOT EXISTS budget_type_caps (
            tenant_id    TEXT NOT NULL,
            account_id   TEXT NOT NULL,
            action_type  TEXT NOT NULL,
            max_count    INTEGER NOT NULL CHECK (max_count >= 0),
            PRIMARY KEY (tenant_id, account_id, action_type)
        );

        -- Daily autonomy budget consumption, created lazily per day.
        CREATE TABLE IF NOT EXISTS budget_state (
            tenant_id   TEXT NOT NULL,
            account_id  TEXT NOT NULL,
            day         TEXT NOT NULL,
            total       INTEGER NOT NULL DEFAULT 0 CHECK (total >= 0),
            PRIMARY KEY (tenant_id, account_id, day)
        );

        CREATE TABLE IF NOT EXISTS budget_counts (
            tenant_id    TEXT NOT NULL,
            account_id   TEXT NOT NULL,
            day          TEXT NOT NULL,
            action_type  TEXT NOT NULL,
            count        INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
            PRIMARY KEY (tenant_id, account_id, day, action_type)
        );

        -- Write-once external side-effect records.
        CREATE TABLE IF NOT EXISTS dedupe_records (
            idempotency_key       TEXT PRIMARY KEY NOT NULL,
            external_object_refs  TEXT NOT NULL,
            action_intent_id      TEXT NOT NULL,
            tool_name             TEXT NOT NULL,
            created_at            INTEGER NOT NULL,
            expires_at            INTEGER NOT NULL
        );

        -- Governance. An empty account_id denotes the tenant-level row;
        -- an empty action_type denotes the DEFAULT mode.
        CREATE TABLE IF NOT EXISTS allow_lists (
            tenant_id     TEXT NOT NULL,
            account_id    TEXT NOT NULL DEFAULT '',
            action_types  TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (tenant_id, account_id)
        );

        CREATE TABLE IF NOT EXISTS autonomy_modes (
            tenant_id    TEXT NOT NULL,
            account_id   TEXT NOT NULL DEFAULT '',
            action_type  TEXT NOT NULL DEFAULT '',
            mode         TEXT NOT NULL
                         CHECK (mode IN ('AUTO_EXECUTE', 'APPROVAL_REQUIRED',
                                         'PROPOSE_ONLY', 'DISABLED')),
            PRIMARY KEY (tenant_id, account_id, action_type)
        );

        -- Action intents proposed by the decision layer.
        CREATE TABLE IF NOT EXISTS action_intents (
            id                TEXT PRIMARY KEY NOT NULL,
            tenant_id         TEXT NOT NULL,
            account_id        TEXT NOT NULL,
            action_type       TEXT NOT NULL,
            risk_level        TEXT NOT NULL,
            confidence_score  REAL NOT NULL,
            expires_at        INTEGER,
            created_at        INTEGER NOT NULL
        );

        -- Durable approved-action events, at most one per key.
        CREATE TABLE IF NOT EXISTS outbox_events (
            event_key    TEXT PRIMARY KEY NOT NULL,
            event_type   TEXT NOT NULL,
            payload      TEXT NOT NULL,
            created_at   INTEGER NOT NULL,
            delivered_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_events (created_at ASC)
            WHERE delivered_at IS NULL;

        -- Append-only audit trail.
        CREATE TABLE IF NOT EXISTS audit_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL,
            payload     TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_kind
            ON audit_events (kind, created_at DESC);

        -- Records written by the internal-note connector.
        CREATE TABLE IF NOT EXISTS internal_notes (
            id                TEXT PRIMARY KEY NOT NULL,
            tenant_id         TEXT NOT NULL,
            account_id        TEXT NOT NULL,
            body              TEXT NOT NULL,
            action_intent_id  TEXT NOT NULL,
            created_at        INTEGER NOT NULL
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'execution_fabric');
        ",
    )
    .map_err(|e| ActuatorError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let tables = table_names(&conn);
        for expected in [
            "action_intents",
            "allow_lists",
            "audit_events",
            "auto_exec_state",
            "autonomy_modes",
            "budget_config",
            "budget_counts",
            "budget_state",
            "budget_type_caps",
            "circuit_breakers",
            "concurrency_slots",
            "dedupe_records",
            "internal_notes",
            "outbox_events",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_slot_count_cannot_go_negative() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO concurrency_slots (connector_id, in_flight) VALUES ('crm', -1)",
            [],
        );
        assert!(result.is_err());
    }
}
