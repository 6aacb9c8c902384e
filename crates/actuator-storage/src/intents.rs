//! Action intents written by the decision layer and read by the gate.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{
    AccountId, ActionIntent, ActionIntentId, ActionType, RiskLevel, TenantId, Timestamp,
};

use crate::db::{sql_err, Database};

/// Repository for action intents.
pub struct IntentRepository {
    db: Arc<Database>,
}

impl IntentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace an intent.
    pub fn save(&self, intent: &ActionIntent) -> Result<(), ActuatorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO action_intents
                    (id, tenant_id, account_id, action_type, risk_level, confidence_score,
                     expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    intent.id.as_str(),
                    intent.tenant_id.as_str(),
                    intent.account_id.as_str(),
                    intent.action_type.as_str(),
                    intent.risk_level.as_str(),
                    intent.confidence_score,
                    intent.expires_at.map(|t| t.0),
                    intent.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to save action intent"))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: &ActionIntentId) -> Result<Option<ActionIntent>, ActuatorError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT tenant_id, account_id, action_type, risk_level, confidence_score,
                            expires_at, created_at
                     FROM action_intents WHERE id = ?1",
                    rusqlite::params![id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, f64>(4)?,
                            row.get::<_, Option<i64>>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err("Failed to load action intent"))?;

            let Some((tenant, account, action_type, risk, confidence, expires, created)) = row
            else {
                return Ok(None);
            };

            Ok(Some(ActionIntent {
                id: id.clone(),
                tenant_id: TenantId(tenant),
                account_id: AccountId(account),
                action_type: ActionType(action_type),
                risk_level: risk.parse::<RiskLevel>().map_err(ActuatorError::Storage)?,
                confidence_score: confidence,
                expires_at: expires.map(Timestamp),
                created_at: Timestamp(created),
            }))
        })
    }
}
