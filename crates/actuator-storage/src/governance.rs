//! Per-tenant governance: action-type allow lists and autonomy modes.
//!
//! Rows are keyed with empty strings standing in for "tenant level"
//! (no account) and "DEFAULT" (no action type).

use std::sync::Arc;

use rusqlite::OptionalExtension;

use actuator_core::error::ActuatorError;
use actuator_core::types::{AccountId, ActionType, AutonomyMode, TenantId};

use crate::db::{sql_err, Database};

fn account_key(account_id: Option<&AccountId>) -> &str {
    account_id.map(AccountId::as_str).unwrap_or("")
}

fn type_key(action_type: Option<&ActionType>) -> &str {
    action_type.map(ActionType::as_str).unwrap_or("")
}

/// Repository for allow lists and autonomy modes.
pub struct GovernanceRepository {
    db: Arc<Database>,
}

impl GovernanceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replace the allow list at tenant level (`account_id = None`) or
    /// account level.
    pub fn set_allow_list(
        &self,
        tenant_id: &TenantId,
        account_id: Option<&AccountId>,
        action_types: &[ActionType],
    ) -> Result<(), ActuatorError> {
        let types = serde_json::to_string(action_types)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO allow_lists (tenant_id, account_id, action_types)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant_id, account_id)
                 DO UPDATE SET action_types = excluded.action_types",
                rusqlite::params![tenant_id.as_str(), account_key(account_id), types],
            )
            .map_err(sql_err("Failed to save allow list"))?;
            Ok(())
        })
    }

    /// Load one allow list. `None` means no list exists at that level,
    /// which differs from an empty list.
    pub fn load_allow_list(
        &self,
        tenant_id: &TenantId,
        account_id: Option<&AccountId>,
    ) -> Result<Option<Vec<ActionType>>, ActuatorError> {
        self.db.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT action_types FROM allow_lists
                     WHERE tenant_id = ?1 AND account_id = ?2",
                    rusqlite::params![tenant_id.as_str(), account_key(account_id)],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("Failed to load allow list"))?;

            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
    }

    pub fn set_autonomy_mode(
        &self,
        tenant_id: &TenantId,
        account_id: Option<&AccountId>,
        action_type: Option<&ActionType>,
        mode: AutonomyMode,
    ) -> Result<(), ActuatorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO autonomy_modes (tenant_id, account_id, action_type, mode)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, account_id, action_type)
                 DO UPDATE SET mode = excluded.mode",
                rusqlite::params![
                    tenant_id.as_str(),
                    account_key(account_id),
                    type_key(action_type),
                    mode.as_str()
                ],
            )
            .map_err(sql_err("Failed to save autonomy mode"))?;
            Ok(())
        })
    }

    /// Load the mode configured at exactly one precedence level.
    pub fn load_autonomy_mode(
        &self,
        tenant_id: &TenantId,
        account_id: Option<&AccountId>,
        action_type: Option<&ActionType>,
    ) -> Result<Option<AutonomyMode>, ActuatorError> {
        self.db.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT mode FROM autonomy_modes
                     WHERE tenant_id = ?1 AND account_id = ?2 AND action_type = ?3",
                    rusqlite::params![
                        tenant_id.as_str(),
                        account_key(account_id),
                        type_key(action_type)
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err("Failed to load autonomy mode"))?;

            raw.map(|m| m.parse::<AutonomyMode>().map_err(ActuatorError::Storage))
                .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (GovernanceRepository, TenantId, AccountId) {
        (
            GovernanceRepository::new(Arc::new(Database::in_memory().unwrap())),
            TenantId::new("t1"),
            AccountId::new("a1"),
        )
    }

    #[test]
    fn test_allow_list_levels_are_separate() {
        let (repo, t, a) = setup();
        repo.set_allow_list(&t, None, &[ActionType::new("CREATE_NOTE")])
            .unwrap();
        assert_eq!(
            repo.load_allow_list(&t, None).unwrap(),
            Some(vec![ActionType::new("CREATE_NOTE")])
        );
        assert!(repo.load_allow_list(&t, Some(&a)).unwrap().is_none());
    }

    #[test]
    fn test_empty_allow_list_is_not_absent() {
        let (repo, t, a) = setup();
        repo.set_allow_list(&t, Some(&a), &[]).unwrap();
        assert_eq!(repo.load_allow_list(&t, Some(&a)).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_allow_list_replace() {
        let (repo, t, _) = setup();
        repo.set_allow_list(&t, None, &[ActionType::new("A")]).unwrap();
        repo.set_allow_list(&t, None, &[ActionType::new("B")]).unwrap();
        assert_eq!(
            repo.load_allow_list(&t, None).unwrap(),
            Some(vec![ActionType::new("B")])
        );
    }

    #[test]
    fn test_autonomy_mode_levels() {
        let (repo, t, a) = setup();
        let note = ActionType::new("CREATE_NOTE");
        repo.set_autonomy_mode(&t, None, None, AutonomyMode::ProposeOnly)
            .unwrap();
        repo.set_autonomy_mode(&t, Some(&a), Some(&note), AutonomyMode::AutoExecute)
            .unwrap();

        assert_eq!(
            repo.load_autonomy_mode(&t, None, None).unwrap(),
            Some(AutonomyMode::ProposeOnly)
        );
        assert_eq!(
            repo.load_autonomy_mode(&t, Some(&a), Some(&note)).unwrap(),
            Some(AutonomyMode::AutoExecute)
        );
        assert_eq!(repo.load_autonomy_mode(&t, Some(&a), None).unwrap(), None);
        assert_eq!(repo.load_autonomy_mode(&t, None, Some(&note)).unwrap(), None);
    }
}
