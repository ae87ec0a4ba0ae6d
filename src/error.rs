//! Core error type for the migration orchestrator

use std::fmt;

/// All failure kinds the orchestrator can surface.
///
/// Each variant owns enough context to render the operator-facing message
/// described in the component that raises it (see the component modules for
/// the exact wording contracts).
#[derive(Debug)]
pub enum CoreError {
    /// `db.checkConnection()` returned false before any work started
    ConnectionCheckFailed,
    /// The distributed lock could not be acquired after the configured retries
    LockAcquisitionFailed {
        attempts: u32,
        held_by: Option<String>,
        expires_at: Option<String>,
    },
    /// `verifyLockOwnership` returned false right after a successful acquire
    LockOwnershipVerificationFailed,
    /// Lock configuration failed validation at construction time
    InvalidLockConfig(String),
    /// The ledger table could not be created or failed validation
    LedgerInitFailed(String),
    /// Two discovered scripts share a timestamp
    DuplicateTimestamp(i64),
    /// A migration filename matched a known extension but no file pattern
    MalformedFilename(String),
    /// A pending script's timestamp is not ahead of the high-water mark
    OrderingViolation { timestamp: i64, high_water_mark: i64 },
    /// Pending set mixes loaders while the transaction mode forbids it
    HybridTransactionConflict {
        files: Vec<String>,
        mode: String,
    },
    /// A migrated file's on-disk checksum no longer matches the ledger
    ChecksumMismatch {
        name: String,
        stored: String,
        current: String,
    },
    /// No loader in the registry claims a discovered file
    NoLoaderForFile(String),
    /// A code migration file resolved to zero or more than one runnable
    AmbiguousCodeMigration { file: String, found: usize },
    /// An SQL loader could not find/read the expected file
    SqlFileError { file: String, reason: String },
    /// A script failed during `up`/`down`, with a preview of what ran
    ExecutionFailed {
        script: String,
        direction: &'static str,
        preview: String,
        reason: String,
    },
    /// `beforeMigrate` ran and failed, before any backup existed
    BeforeMigrateFailed(String),
    /// The backup driver failed to produce or restore a backup
    BackupFailed(String),
    /// Rollback could not undo a previously-executed script (missing `down`)
    RollbackIncomplete { script: String, reason: String },
    /// `RESTORE_ONLY` backup mode configured without an existing backup path
    MissingExistingBackupPath,
    /// Wraps an error surfaced by a caller-supplied collaborator (`DbHandle`,
    /// `SchemaVersionDriver`, `BackupDriver`, `LockDriver`)
    Driver(String),
    /// Any other configuration or I/O failure not covered above
    Other(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ConnectionCheckFailed => write!(
                f,
                "Database connection check failed. Cannot proceed with migration operations. \
                 Verify your connection settings and that the database is reachable."
            ),
            CoreError::LockAcquisitionFailed { attempts, held_by, expires_at } => {
                write!(
                    f,
                    "Failed to acquire migration lock after {attempts} attempt(s); \
                     currently held by: {held}, expires at: {exp}. \
                     If this lock is stale, run `lock:release --force`.",
                    held = held_by.as_deref().unwrap_or("<unknown>"),
                    exp = expires_at.as_deref().unwrap_or("<unknown>"),
                )
            }
            CoreError::LockOwnershipVerificationFailed => {
                write!(f, "Lock ownership verification failed")
            }
            CoreError::InvalidLockConfig(msg) => write!(f, "Invalid locking configuration: {msg}"),
            CoreError::LedgerInitFailed(msg) => write!(f, "{msg}"),
            CoreError::DuplicateTimestamp(ts) => {
                write!(f, "Duplicate migration timestamp detected: {ts}")
            }
            CoreError::MalformedFilename(name) => {
                write!(f, "Migration file name does not match any configured pattern: {name}")
            }
            CoreError::OrderingViolation { timestamp, high_water_mark } => write!(
                f,
                "Ordering violation: pending migration {timestamp} is not ahead of the \
                 high-water mark {high_water_mark}"
            ),
            CoreError::HybridTransactionConflict { files, mode } => write!(
                f,
                "Hybrid migrations detected in pending set: {joined}. \
                 Current transaction mode: {mode}. \
                 Resolve by: (1) switching transaction.mode to \"none\", \
                 (2) running each loader's files in a separate batch, or \
                 (3) converting all pending migrations to a single format.",
                joined = files.join(", "),
            ),
            CoreError::ChecksumMismatch { name, stored, current } => write!(
                f,
                "Migration '{name}' failed integrity check. Stored checksum: {stored}, \
                 current checksum: {current}. The file was modified after being applied."
            ),
            CoreError::NoLoaderForFile(name) => {
                write!(f, "No loader registered that can handle file: {name}")
            }
            CoreError::AmbiguousCodeMigration { file, found } => write!(
                f,
                "Migration file '{file}' must export exactly one runnable; found {found}"
            ),
            CoreError::SqlFileError { file, reason } => {
                write!(f, "SQL migration file '{file}': {reason}")
            }
            CoreError::ExecutionFailed { script, direction, preview, reason } => write!(
                f,
                "Migration '{script}' failed during {direction}: {reason}\nSQL preview: {preview}"
            ),
            CoreError::BeforeMigrateFailed(msg) => {
                write!(f, "beforeMigrate script failed: {msg}")
            }
            CoreError::BackupFailed(msg) => write!(f, "Backup operation failed: {msg}"),
            CoreError::RollbackIncomplete { script, reason } => write!(
                f,
                "Rollback could not undo previously-executed migration '{script}': {reason}"
            ),
            CoreError::MissingExistingBackupPath => write!(
                f,
                "backup.existingBackupPath must be set when backupMode is RESTORE_ONLY"
            ),
            CoreError::Driver(msg) => write!(f, "{msg}"),
            CoreError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquisition_failure_mentions_force_release() {
        let err = CoreError::LockAcquisitionFailed {
            attempts: 10,
            held_by: Some("host-a:1234:abcd".into()),
            expires_at: Some("2026-07-28T00:00:00Z".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("10 attempt"));
        assert!(rendered.contains("host-a:1234:abcd"));
        assert!(rendered.contains("lock:release --force"));
    }

    #[test]
    fn lock_acquisition_failure_handles_unknown_holder() {
        let err = CoreError::LockAcquisitionFailed { attempts: 1, held_by: None, expires_at: None };
        assert!(err.to_string().contains("<unknown>"));
    }

    #[test]
    fn hybrid_transaction_conflict_lists_every_file() {
        let err = CoreError::HybridTransactionConflict {
            files: vec!["1_a.up.sql".into(), "2_b.rs".into()],
            mode: "PER_MIGRATION".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("1_a.up.sql"));
        assert!(rendered.contains("2_b.rs"));
        assert!(rendered.contains("PER_MIGRATION"));
    }

    #[test]
    fn checksum_mismatch_names_both_digests() {
        let err = CoreError::ChecksumMismatch {
            name: "1_a.up.sql".into(),
            stored: "aaaa".into(),
            current: "bbbb".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("aaaa"));
        assert!(rendered.contains("bbbb"));
    }

    #[test]
    fn every_variant_implements_the_std_error_trait() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&CoreError::ConnectionCheckFailed);
    }
}
