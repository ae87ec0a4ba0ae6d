//! Lock Service (§4.5): distributed locking with ownership and expiry.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use regex::Regex;

use crate::error::CoreError;
use crate::interfaces::{LockDriver, LockStatus};

/// Locking configuration, validated at construction (§4.5 invariants).
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub enabled: bool,
    pub table_name: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl LockConfig {
    /// # Errors
    /// Returns [`CoreError::InvalidLockConfig`] if any field is out of range:
    /// `timeout` must be positive and at most one hour; `retry_attempts`
    /// must be in `0..=100`; `retry_delay` at most 60 seconds; `table_name`
    /// must match `^[A-Za-z_][A-Za-z0-9_]*$` and be non-empty.
    pub fn new(
        enabled: bool,
        table_name: impl Into<String>,
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, CoreError> {
        let table_name = table_name.into();

        if timeout.is_zero() || timeout > Duration::from_secs(3600) {
            return Err(CoreError::InvalidLockConfig(
                "timeout must be positive and at most 1 hour".into(),
            ));
        }
        if retry_attempts > 100 {
            return Err(CoreError::InvalidLockConfig(
                "retryAttempts must be in [0, 100]".into(),
            ));
        }
        if retry_delay > Duration::from_secs(60) {
            return Err(CoreError::InvalidLockConfig(
                "retryDelay must be in [0, 60000] ms".into(),
            ));
        }
        let name_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern is valid");
        if table_name.trim().is_empty() || !name_re.is_match(&table_name) {
            return Err(CoreError::InvalidLockConfig(format!(
                "tableName '{table_name}' must match ^[A-Za-z_][A-Za-z0-9_]*$ and be non-empty"
            )));
        }

        Ok(Self {
            enabled,
            table_name,
            timeout,
            retry_attempts,
            retry_delay,
        })
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(true, "migration_lock", Duration::from_secs(60), 10, Duration::from_millis(500))
            .expect("default lock config is valid")
    }
}

/// Generates a per-call owner id of the form `hostname-pid-uuid`.
pub fn generate_owner_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{hostname}-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Drives a [`LockDriver`] according to the ownership discipline in §4.5.
pub struct LockService {
    driver: Arc<dyn LockDriver>,
    config: LockConfig,
}

impl LockService {
    pub fn new(driver: Arc<dyn LockDriver>, config: LockConfig) -> Self {
        Self { driver, config }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Called once, before the first acquisition attempt.
    pub fn check_and_release_expired(&self) -> Result<bool, CoreError> {
        self.driver.ensure_lock_storage_accessible(&self.config.table_name)?;
        self.driver.check_and_release_expired_lock(&self.config.table_name)
    }

    /// Retries `1 + retry_attempts` times total, sleeping `retry_delay`
    /// between attempts (constant delay — no mandated backoff, per §4.5).
    pub fn acquire(&self, owner_id: &str) -> Result<(), CoreError> {
        let total_attempts = 1 + self.config.retry_attempts;
        for attempt in 1..=total_attempts {
            if self
                .driver
                .acquire_lock(&self.config.table_name, owner_id, self.config.timeout)?
            {
                return Ok(());
            }
            if attempt < total_attempts {
                thread::sleep(self.config.retry_delay);
            }
        }

        let status = self.driver.get_lock_status(&self.config.table_name).unwrap_or_default();
        Err(CoreError::LockAcquisitionFailed {
            attempts: total_attempts,
            held_by: status.owner_id,
            expires_at: status.expires_at,
        })
    }

    pub fn verify_ownership(&self, owner_id: &str) -> Result<(), CoreError> {
        if self.driver.verify_lock_ownership(&self.config.table_name, owner_id)? {
            Ok(())
        } else {
            Err(CoreError::LockOwnershipVerificationFailed)
        }
    }

    /// Release failures are logged and swallowed — they never mask the
    /// primary Orchestrator result (§4.5).
    pub fn release(&self, owner_id: &str) {
        if let Err(e) = self.driver.release_lock(&self.config.table_name, owner_id) {
            log::warn!("failed to release migration lock: {e}");
        }
    }

    pub fn force_release(&self) -> Result<(), CoreError> {
        self.driver.force_release_lock(&self.config.table_name)
    }

    pub fn status(&self) -> Result<LockStatus, CoreError> {
        self.driver.get_lock_status(&self.config.table_name)
    }
}

/// RAII guard that releases the lock when dropped, over the pluggable
/// [`LockDriver`].
pub struct LockGuard<'a> {
    service: &'a LockService,
    owner_id: String,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(service: &'a LockService, owner_id: String) -> Result<Self, CoreError> {
        service.check_and_release_expired()?;
        service.acquire(&owner_id)?;
        service.verify_ownership(&owner_id)?;
        Ok(Self { service, owner_id })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        self.service.release(&self.owner_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryLock;

    #[test]
    fn rejects_zero_timeout() {
        let err = LockConfig::new(true, "migration_lock", Duration::ZERO, 10, Duration::from_millis(500));
        assert!(matches!(err, Err(CoreError::InvalidLockConfig(_))));
    }

    #[test]
    fn rejects_timeout_over_one_hour() {
        let err = LockConfig::new(true, "migration_lock", Duration::from_secs(3601), 10, Duration::from_millis(500));
        assert!(matches!(err, Err(CoreError::InvalidLockConfig(_))));
    }

    #[test]
    fn rejects_invalid_table_name() {
        let err = LockConfig::new(true, "1bad-name", Duration::from_secs(10), 1, Duration::from_millis(10));
        assert!(matches!(err, Err(CoreError::InvalidLockConfig(_))));
    }

    #[test]
    fn owner_id_has_three_parts() {
        let id = generate_owner_id();
        assert_eq!(id.splitn(3, '-').count(), 3);
    }

    #[test]
    fn guard_releases_on_drop() {
        let driver = Arc::new(InMemoryLock::new());
        let config = LockConfig::new(true, "migration_lock", Duration::from_secs(5), 0, Duration::from_millis(1)).unwrap();
        let service = LockService::new(driver.clone(), config);

        {
            let _guard = LockGuard::acquire(&service, "owner-a".to_string()).unwrap();
            assert!(service.status().unwrap().locked);
        }
        assert!(!service.status().unwrap().locked);
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let driver = Arc::new(InMemoryLock::new());
        let config = LockConfig::new(true, "migration_lock", Duration::from_secs(5), 1, Duration::from_millis(1)).unwrap();
        let service = LockService::new(driver, config);

        let _guard = LockGuard::acquire(&service, "owner-a".to_string()).unwrap();
        let err = service.acquire("owner-b");
        assert!(matches!(err, Err(CoreError::LockAcquisitionFailed { .. })));
    }
}
