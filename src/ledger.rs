//! The schema-version ledger: what the Schema-Version Service persists.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::CoreError;
use crate::interfaces::SchemaVersionDriver;

/// One applied-migration record, keyed by `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationInfo {
    pub timestamp: i64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub username: String,
    /// Opaque textual return value of the script's `up`/`down`.
    pub result: String,
    pub content_hash: Option<String>,
}

/// Thin wrapper over [`SchemaVersionDriver`] (§4.4).
///
/// Performs no validation of table names itself — that is delegated to the
/// driver, matching the "no input validation on table names" note in the
/// design (the stricter locking-table regex lives in [`crate::lock`]).
pub struct SchemaVersionService {
    driver: Arc<dyn SchemaVersionDriver>,
}

impl SchemaVersionService {
    pub fn new(driver: Arc<dyn SchemaVersionDriver>) -> Self {
        Self { driver }
    }

    /// Ensure the ledger table exists and is valid.
    pub fn init(&self, table_name: &str) -> Result<(), CoreError> {
        let initialized = self.driver.is_initialized(table_name)?;
        if !initialized {
            let created = self.driver.create_table(table_name)?;
            if !created {
                return Err(CoreError::LedgerInitFailed(format!(
                    "Cannot create table '{table_name}'"
                )));
            }
        }
        let valid = self.driver.validate_table(table_name)?;
        if !valid {
            return Err(CoreError::LedgerInitFailed(format!(
                "Schema version table is invalid: '{table_name}'"
            )));
        }
        Ok(())
    }

    pub fn save(&self, info: &MigrationInfo) -> Result<(), CoreError> {
        self.driver.save(info)
    }

    /// Missing row is not an error.
    pub fn remove(&self, timestamp: i64) -> Result<(), CoreError> {
        self.driver.remove(timestamp)
    }

    pub fn get_all_executed(&self) -> Result<Vec<MigrationInfo>, CoreError> {
        self.driver.get_all_executed()
    }
}
