//! In-memory reference implementations of every external interface trait,
//! for use in this crate's own test suite and by downstream integration
//! tests. Same shape as `test_helpers.rs`: one in-memory struct per
//! collaborator trait, mutex-guarded state, configurable failure injection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::error::CoreError;
use crate::interfaces::{BackupDriver, DbHandle, DbRow, LockDriver, LockStatus, SchemaVersionDriver};
use crate::ledger::MigrationInfo;

/// A `DbHandle` that records every statement it was asked to run and always
/// succeeds, unless a specific statement has been pre-configured to fail via
/// [`InMemoryDb::fail_on`].
#[derive(Default)]
pub struct InMemoryDb {
    inner: Mutex<InMemoryDbState>,
}

#[derive(Default)]
struct InMemoryDbState {
    statements: Vec<String>,
    connected: bool,
    failures: HashMap<String, String>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        let db = Self::default();
        db.inner.lock().expect("lock").connected = true;
        db
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().expect("lock").connected = connected;
    }

    /// Any future `query` call containing `needle` returns this error text.
    pub fn fail_on(&self, needle: &str, message: &str) {
        self.inner.lock().expect("lock").failures.insert(needle.to_string(), message.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().expect("lock").statements.clone()
    }
}

impl DbHandle for InMemoryDb {
    fn check_connection(&self) -> bool {
        self.inner.lock().expect("lock").connected
    }

    fn query(&self, sql: &str) -> Result<Vec<DbRow>, CoreError> {
        let mut state = self.inner.lock().expect("lock");
        if let Some((_, message)) = state.failures.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Err(CoreError::Driver(message.clone()));
        }
        state.statements.push(sql.to_string());
        Ok(Vec::new())
    }
}

/// A `BackupDriver` that "backs up" into an in-memory string and restores
/// from whatever path/content it is given.
#[derive(Default)]
pub struct InMemoryBackup {
    inner: Mutex<InMemoryBackupState>,
}

#[derive(Default)]
struct InMemoryBackupState {
    next_path: usize,
    restores: Vec<String>,
    fail_backup: bool,
    fail_restore: bool,
}

impl InMemoryBackup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_backup(&self, fail: bool) {
        self.inner.lock().expect("lock").fail_backup = fail;
    }

    pub fn set_fail_restore(&self, fail: bool) {
        self.inner.lock().expect("lock").fail_restore = fail;
    }

    pub fn restores(&self) -> Vec<String> {
        self.inner.lock().expect("lock").restores.clone()
    }
}

impl BackupDriver for InMemoryBackup {
    fn backup(&self) -> Result<String, CoreError> {
        let mut state = self.inner.lock().expect("lock");
        if state.fail_backup {
            return Err(CoreError::Driver("backup driver configured to fail".into()));
        }
        state.next_path += 1;
        Ok(format!("mem-backup-{}", state.next_path))
    }

    fn restore(&self, content_or_path: &str) -> Result<(), CoreError> {
        let mut state = self.inner.lock().expect("lock");
        if state.fail_restore {
            return Err(CoreError::Driver("restore driver configured to fail".into()));
        }
        state.restores.push(content_or_path.to_string());
        Ok(())
    }
}

/// A `SchemaVersionDriver` backed by a `Vec<MigrationInfo>` behind a mutex.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<InMemoryLedgerState>,
}

#[derive(Default)]
struct InMemoryLedgerState {
    initialized: bool,
    valid: bool,
    rows: Vec<MigrationInfo>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.inner.lock().expect("lock").valid = true;
        ledger
    }

    pub fn seed(&self, rows: Vec<MigrationInfo>) {
        let mut state = self.inner.lock().expect("lock");
        state.initialized = true;
        state.rows = rows;
    }
}

impl SchemaVersionDriver for InMemoryLedger {
    fn is_initialized(&self, _table_name: &str) -> Result<bool, CoreError> {
        Ok(self.inner.lock().expect("lock").initialized)
    }

    fn create_table(&self, _table_name: &str) -> Result<bool, CoreError> {
        let mut state = self.inner.lock().expect("lock");
        state.initialized = true;
        Ok(true)
    }

    fn validate_table(&self, _table_name: &str) -> Result<bool, CoreError> {
        Ok(self.inner.lock().expect("lock").valid)
    }

    fn get_all_executed(&self) -> Result<Vec<MigrationInfo>, CoreError> {
        Ok(self.inner.lock().expect("lock").rows.clone())
    }

    fn save(&self, info: &MigrationInfo) -> Result<(), CoreError> {
        self.inner.lock().expect("lock").rows.push(info.clone());
        Ok(())
    }

    fn remove(&self, timestamp: i64) -> Result<(), CoreError> {
        self.inner.lock().expect("lock").rows.retain(|m| m.timestamp != timestamp);
        Ok(())
    }
}

/// A `LockDriver` with expiry semantics, for exercising acquire/contend/expire.
#[derive(Default)]
pub struct InMemoryLock {
    inner: Mutex<Option<LockRow>>,
}

struct LockRow {
    owner_id: String,
    acquired_at: SystemTime,
    expires_at: SystemTime,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockDriver for InMemoryLock {
    fn init_lock_storage(&self, _table_name: &str) -> Result<(), CoreError> {
        Ok(())
    }

    fn ensure_lock_storage_accessible(&self, _table_name: &str) -> Result<(), CoreError> {
        Ok(())
    }

    fn acquire_lock(&self, _table_name: &str, owner_id: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut guard = self.inner.lock().expect("lock");
        let now = SystemTime::now();
        let expired = guard.as_ref().map(|row| row.expires_at <= now).unwrap_or(true);
        if !expired {
            return Ok(false);
        }
        *guard = Some(LockRow { owner_id: owner_id.to_string(), acquired_at: now, expires_at: now + ttl });
        Ok(true)
    }

    fn verify_lock_ownership(&self, _table_name: &str, owner_id: &str) -> Result<bool, CoreError> {
        let guard = self.inner.lock().expect("lock");
        Ok(guard.as_ref().map(|row| row.owner_id == owner_id).unwrap_or(false))
    }

    fn release_lock(&self, _table_name: &str, owner_id: &str) -> Result<(), CoreError> {
        let mut guard = self.inner.lock().expect("lock");
        if guard.as_ref().map(|row| row.owner_id == owner_id).unwrap_or(false) {
            *guard = None;
        }
        Ok(())
    }

    fn force_release_lock(&self, _table_name: &str) -> Result<(), CoreError> {
        *self.inner.lock().expect("lock") = None;
        Ok(())
    }

    fn check_and_release_expired_lock(&self, _table_name: &str) -> Result<bool, CoreError> {
        let mut guard = self.inner.lock().expect("lock");
        let now = SystemTime::now();
        if guard.as_ref().map(|row| row.expires_at <= now).unwrap_or(false) {
            *guard = None;
            return Ok(true);
        }
        Ok(false)
    }

    fn get_lock_status(&self, _table_name: &str) -> Result<LockStatus, CoreError> {
        let guard = self.inner.lock().expect("lock");
        Ok(match guard.as_ref() {
            Some(row) => LockStatus {
                locked: true,
                owner_id: Some(row.owner_id.clone()),
                acquired_at: Some(format!("{:?}", row.acquired_at)),
                expires_at: Some(format!("{:?}", row.expires_at)),
            },
            None => LockStatus::default(),
        })
    }
}
