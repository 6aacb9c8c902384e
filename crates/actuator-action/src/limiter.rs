//! Per-connector concurrency limiter.
//!
//! A distributed semaphore over the shared store. Slots are handed out as
//! [`SlotPermit`]s that give the slot back when dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use actuator_core::config::ConcurrencyConfig;
use actuator_core::error::ActuatorError;
use actuator_core::types::{ConnectorId, Timestamp};
use actuator_storage::{Database, SlotRepository};

pub struct ConcurrencyLimiter {
    repo: Arc<SlotRepository>,
    config: ConcurrencyConfig,
}

impl ConcurrencyLimiter {
    pub fn new(db: Arc<Database>, config: ConcurrencyConfig) -> Self {
        Self {
            repo: Arc::new(SlotRepository::new(db)),
            config,
        }
    }

    /// Take a slot for the connector, or `None` when all slots are in use.
    pub fn try_acquire(&self, connector_id: &ConnectorId) -> Result<Option<SlotPermit>, ActuatorError> {
        let max = self.config.max_for(connector_id.as_str());
        if !self.repo.try_acquire(connector_id, max, Timestamp::now())? {
            debug!(connector_id = %connector_id, max, "No concurrency slot available");
            return Ok(None);
        }
        Ok(Some(SlotPermit {
            repo: Arc::clone(&self.repo),
            connector_id: connector_id.clone(),
            released: false,
        }))
    }

    /// Suggested wait before retrying after a denied acquire.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.config.retry_after_secs.max(1))
    }

    pub fn in_flight(&self, connector_id: &ConnectorId) -> Result<u32, ActuatorError> {
        self.repo.in_flight(connector_id)
    }
}

/// A held concurrency slot.
///
/// Released exactly once: explicitly through [`SlotPermit::release`] or
/// implicitly on drop.
pub struct SlotPermit {
    repo: Arc<SlotRepository>,
    connector_id: ConnectorId,
    released: bool,
}

impl SlotPermit {
    pub fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }

    /// Give the slot back, reporting storage errors to the caller.
    pub fn release(mut self) -> Result<(), ActuatorError> {
        self.released = true;
        self.repo.release(&self.connector_id, Timestamp::now())?;
        Ok(())
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.repo.release(&self.connector_id, Timestamp::now()) {
            warn!(connector_id = %self.connector_id, error = %e, "Failed to release concurrency slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> ConcurrencyLimiter {
        let config = ConcurrencyConfig {
            max_in_flight: max,
            ..ConcurrencyConfig::default()
        };
        ConcurrencyLimiter::new(Arc::new(Database::in_memory().unwrap()), config)
    }

    #[test]
    fn test_bound_is_enforced() {
        let limiter = limiter(2);
        let crm = ConnectorId::new("crm");
        let a = limiter.try_acquire(&crm).unwrap();
        let b = limiter.try_acquire(&crm).unwrap();
        let c = limiter.try_acquire(&crm).unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(limiter.in_flight(&crm).unwrap(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let limiter = limiter(1);
        let crm = ConnectorId::new("crm");
        {
            let _permit = limiter.try_acquire(&crm).unwrap().unwrap();
            assert_eq!(limiter.in_flight(&crm).unwrap(), 1);
        }
        assert_eq!(limiter.in_flight(&crm).unwrap(), 0);
        assert!(limiter.try_acquire(&crm).unwrap().is_some());
    }

    #[test]
    fn test_explicit_release_then_drop_releases_once() {
        let limiter = limiter(3);
        let crm = ConnectorId::new("crm");
        let _held = limiter.try_acquire(&crm).unwrap().unwrap();
        let permit = limiter.try_acquire(&crm).unwrap().unwrap();
        assert_eq!(limiter.in_flight(&crm).unwrap(), 2);
        permit.release().unwrap();
        assert_eq!(limiter.in_flight(&crm).unwrap(), 1);
    }

    #[test]
    fn test_per_connector_override() {
        let mut config = ConcurrencyConfig::default();
        config.per_connector.insert("crm".to_string(), 1);
        let limiter = ConcurrencyLimiter::new(Arc::new(Database::in_memory().unwrap()), config);
        let crm = ConnectorId::new("crm");
        let _p = limiter.try_acquire(&crm).unwrap().unwrap();
        assert!(limiter.try_acquire(&crm).unwrap().is_none());
        assert!(limiter.try_acquire(&ConnectorId::new("mail")).unwrap().is_some());
    }

    #[test]
    fn test_retry_after_is_positive() {
        let config = ConcurrencyConfig {
            retry_after_secs: 0,
            ..ConcurrencyConfig::default()
        };
        let limiter = ConcurrencyLimiter::new(Arc::new(Database::in_memory().unwrap()), config);
        assert_eq!(limiter.retry_after(), Duration::from_secs(1));
    }
}
