//! Backup Service (§4.7): thin wrapper over a [`BackupDriver`] collaborator.

use std::sync::Arc;

use crate::config::{BackupConfig, BackupMode};
use crate::error::CoreError;
use crate::interfaces::BackupDriver;

pub struct BackupService {
    driver: Arc<dyn BackupDriver>,
}

impl BackupService {
    pub fn new(driver: Arc<dyn BackupDriver>) -> Self {
        Self { driver }
    }

    /// Produces a backup and returns its opaque path/identifier.
    pub fn create(&self) -> Result<String, CoreError> {
        self.driver.backup().map_err(|e| CoreError::BackupFailed(e.to_string()))
    }

    pub fn restore(&self, path: &str) -> Result<(), CoreError> {
        self.driver.restore(path).map_err(|e| CoreError::BackupFailed(e.to_string()))
    }

    /// `RESTORE_ONLY` requires a pre-supplied path; checked before any
    /// execution starts (§4.7).
    pub fn validate_restore_only(mode: BackupMode, config: &BackupConfig) -> Result<(), CoreError> {
        if mode == BackupMode::RestoreOnly && config.existing_backup_path.is_none() {
            return Err(CoreError::MissingExistingBackupPath);
        }
        Ok(())
    }

    /// Whether a backup artifact should be produced for this run.
    pub fn should_create(mode: BackupMode, dry_run: bool) -> bool {
        !dry_run && matches!(mode, BackupMode::Full | BackupMode::CreateOnly)
    }

    /// Resolves the path a rollback restore should read from: the backup
    /// just created, or `existingBackupPath` under `RESTORE_ONLY`.
    pub fn restore_source(mode: BackupMode, config: &BackupConfig, created: Option<&str>) -> Option<String> {
        if mode == BackupMode::RestoreOnly {
            config.existing_backup_path.as_ref().map(|p| p.display().to_string())
        } else {
            created.map(str::to_string)
        }
    }
}
