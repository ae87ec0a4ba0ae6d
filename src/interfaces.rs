//! External collaborator interfaces (§6 of the design).
//!
//! The orchestrator never talks to a concrete database, backup tool, or
//! lock table directly — it only calls through these traits. Production
//! callers supply real implementations (a Postgres pool, an S3 backup
//! uploader, a Redis-backed lock); [`crate::testing`] supplies in-memory
//! ones for the test suite.

use std::fmt;
use std::time::Duration;

use crate::error::CoreError;
use crate::ledger::MigrationInfo;

/// A single database value, loosely typed so the core crate never depends
/// on a specific driver's row representation.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => write!(f, "NULL"),
            DbValue::Bool(b) => write!(f, "{b}"),
            DbValue::Int(i) => write!(f, "{i}"),
            DbValue::Float(v) => write!(f, "{v}"),
            DbValue::Text(s) => write!(f, "{s}"),
            DbValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// One row returned by [`DbHandle::query`].
pub type DbRow = Vec<DbValue>;

/// The "IDB" interface: the concrete database handle (§6).
///
/// Transaction control (`BEGIN`/`COMMIT`/`ROLLBACK`/`SET TRANSACTION
/// ISOLATION LEVEL ...`) is issued as ordinary statements through `query`,
/// the same way SQL-loader migrations run — the interface stays exactly the
/// two operations named in the design (`checkConnection`, `query`) rather
/// than growing a parallel transaction API.
pub trait DbHandle: Send + Sync {
    /// Verify the database is reachable before any migration work starts.
    fn check_connection(&self) -> bool;

    /// Execute a statement and return whatever rows it produces (empty for DDL/DML).
    fn query(&self, sql: &str) -> Result<Vec<DbRow>, CoreError>;
}

/// The "IBackup" interface (§6): produces and restores opaque backup blobs.
pub trait BackupDriver: Send + Sync {
    /// Produce a backup and return an opaque path/identifier for it.
    fn backup(&self) -> Result<String, CoreError>;
    /// Restore from a previously-produced backup path, or from `existingBackupPath`.
    fn restore(&self, content_or_path: &str) -> Result<(), CoreError>;
}

/// The "ISchemaVersion" interface (§6): the ledger table driver.
pub trait SchemaVersionDriver: Send + Sync {
    fn is_initialized(&self, table_name: &str) -> Result<bool, CoreError>;
    fn create_table(&self, table_name: &str) -> Result<bool, CoreError>;
    fn validate_table(&self, table_name: &str) -> Result<bool, CoreError>;
    fn get_all_executed(&self) -> Result<Vec<MigrationInfo>, CoreError>;
    fn save(&self, info: &MigrationInfo) -> Result<(), CoreError>;
    fn remove(&self, timestamp: i64) -> Result<(), CoreError>;
}

/// Snapshot of a lock row, returned by [`LockDriver::get_lock_status`].
#[derive(Debug, Clone, Default)]
pub struct LockStatus {
    pub locked: bool,
    pub owner_id: Option<String>,
    pub acquired_at: Option<String>,
    pub expires_at: Option<String>,
}

/// The "ILockingService" interface (§6 / §4.5).
pub trait LockDriver: Send + Sync {
    fn init_lock_storage(&self, table_name: &str) -> Result<(), CoreError>;
    fn ensure_lock_storage_accessible(&self, table_name: &str) -> Result<(), CoreError>;
    /// Atomically create the lock record iff none exists or the existing
    /// one has expired. Returns `false` on contention.
    fn acquire_lock(&self, table_name: &str, owner_id: &str, ttl: Duration) -> Result<bool, CoreError>;
    fn verify_lock_ownership(&self, table_name: &str, owner_id: &str) -> Result<bool, CoreError>;
    fn release_lock(&self, table_name: &str, owner_id: &str) -> Result<(), CoreError>;
    fn force_release_lock(&self, table_name: &str) -> Result<(), CoreError>;
    /// Returns `true` if an expired lock was found and released.
    fn check_and_release_expired_lock(&self, table_name: &str) -> Result<bool, CoreError>;
    fn get_lock_status(&self, table_name: &str) -> Result<LockStatus, CoreError>;
}
