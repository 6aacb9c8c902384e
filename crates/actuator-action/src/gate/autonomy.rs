//! Allow-list lookup and autonomy-mode resolution.

use std::sync::Arc;

use tracing::debug;

use actuator_core::error::ActuatorError;
use actuator_core::types::{AccountId, ActionType, AutonomyMode, TenantId};
use actuator_storage::{Database, GovernanceRepository};

pub struct GovernanceResolver {
    repo: GovernanceRepository,
}

impl GovernanceResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: GovernanceRepository::new(db),
        }
    }

    /// Whether the action type is allow-listed for the account.
    ///
    /// An account-level list, when present, is authoritative. Otherwise the
    /// tenant-level list applies. No list at all allows nothing.
    pub fn is_allowlisted(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
    ) -> Result<bool, ActuatorError> {
        let list = match self.repo.load_allow_list(tenant_id, Some(account_id))? {
            Some(list) => Some(list),
            None => self.repo.load_allow_list(tenant_id, None)?,
        };
        Ok(list.is_some_and(|types| types.contains(action_type)))
    }

    /// Resolve the autonomy mode, most specific first:
    /// (account, type), (tenant, type), (account, DEFAULT), (tenant, DEFAULT),
    /// then APPROVAL_REQUIRED.
    pub fn resolve_mode(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        action_type: &ActionType,
    ) -> Result<AutonomyMode, ActuatorError> {
        let levels: [(Option<&AccountId>, Option<&ActionType>); 4] = [
            (Some(account_id), Some(action_type)),
            (None, Some(action_type)),
            (Some(account_id), None),
            (None, None),
        ];
        for (account, action) in levels {
            if let Some(mode) = self.repo.load_autonomy_mode(tenant_id, account, action)? {
                debug!(
                    tenant_id = %tenant_id,
                    account_level = account.is_some(),
                    type_level = action.is_some(),
                    mode = %mode,
                    "Autonomy mode resolved"
                );
                return Ok(mode);
            }
        }
        Ok(AutonomyMode::ApprovalRequired)
    }
}
