//! Executor: runs one migration script's `up` under the configured
//! transaction mode, with commit retry and optional exponential backoff.

use std::any::Any;
use std::thread;

use crate::config::{Isolation, TransactionConfig, TransactionMode};
use crate::error::CoreError;
use crate::interfaces::DbHandle;
use crate::ledger::MigrationInfo;
use crate::loader::{ExecutionContext, LoaderRegistry, Runnable};
use crate::script::MigrationScript;

fn isolation_sql(isolation: Isolation) -> &'static str {
    match isolation {
        Isolation::ReadUncommitted => "READ UNCOMMITTED",
        Isolation::ReadCommitted => "READ COMMITTED",
        Isolation::RepeatableRead => "REPEATABLE READ",
        Isolation::Serializable => "SERIALIZABLE",
    }
}

pub struct Executor<'a> {
    db: &'a dyn DbHandle,
    config: &'a TransactionConfig,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a dyn DbHandle, config: &'a TransactionConfig) -> Self {
        Self { db, config }
    }

    fn begin(&self) -> Result<(), CoreError> {
        self.db
            .query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation_sql(self.config.isolation)))?;
        self.db.query("BEGIN")?;
        Ok(())
    }

    /// Retries `COMMIT` up to `config.retries` additional times, doubling
    /// `retry_delay` between attempts when `retry_backoff` is set.
    fn commit(&self) -> Result<(), CoreError> {
        let mut delay = self.config.retry_delay;
        let mut last_err = None;
        for attempt in 0..=self.config.retries {
            match self.db.query("COMMIT") {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < self.config.retries {
                        thread::sleep(delay);
                        if self.config.retry_backoff {
                            delay = delay.saturating_mul(2);
                        }
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    fn rollback_tx(&self) {
        if let Err(e) = self.db.query("ROLLBACK") {
            log::warn!("ROLLBACK statement itself failed: {e}");
        }
    }

    pub fn begin_batch(&self) -> Result<(), CoreError> {
        if self.config.mode == TransactionMode::PerBatch {
            self.begin()
        } else {
            Ok(())
        }
    }

    pub fn commit_batch(&self) -> Result<(), CoreError> {
        if self.config.mode == TransactionMode::PerBatch {
            self.commit()
        } else {
            Ok(())
        }
    }

    pub fn rollback_batch(&self) {
        if self.config.mode == TransactionMode::PerBatch {
            self.rollback_tx();
        }
    }

    /// Runs one script's `up`, wrapping it in its own transaction under
    /// `PER_MIGRATION`; under `NONE`/`PER_BATCH` no transaction control is
    /// issued here (the caller owns batch-level transactions).
    pub fn execute_one(
        &self,
        script: &MigrationScript,
        info: &MigrationInfo,
        handler: &(dyn Any + Send + Sync),
        registry: &LoaderRegistry,
    ) -> Result<String, CoreError> {
        registry.load(script)?;

        if self.config.mode == TransactionMode::PerMigration {
            self.begin()?;
        }

        let ctx = ExecutionContext { db: self.db, info, handler };
        let outcome = script
            .with_loaded(|r: &dyn Runnable| r.up(&ctx))
            .expect("registry.load populated this script");

        match outcome {
            Ok(text) => {
                if self.config.mode == TransactionMode::PerMigration {
                    if let Err(e) = self.commit() {
                        self.rollback_tx();
                        return Err(e);
                    }
                }
                Ok(text)
            }
            Err(e) => {
                if self.config.mode == TransactionMode::PerMigration {
                    self.rollback_tx();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MigrationInfo;
    use crate::loader::LoaderRegistry;
    use crate::script::MigrationScript;
    use crate::testing::InMemoryDb;
    use std::time::Duration;

    fn info(timestamp: i64) -> MigrationInfo {
        MigrationInfo {
            timestamp,
            name: format!("{timestamp}.up.sql"),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            username: "tester".into(),
            result: String::new(),
            content_hash: None,
        }
    }

    #[test]
    fn per_migration_mode_wraps_each_script_in_its_own_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_a.up.sql");
        std::fs::write(&path, "create table a (id int);").unwrap();

        let db = InMemoryDb::new();
        let registry = LoaderRegistry::with_defaults();
        let script = MigrationScript::new(1, "1_a.up.sql".into(), path, None);

        let config = TransactionConfig { mode: TransactionMode::PerMigration, ..TransactionConfig::default() };
        let executor = Executor::new(&db, &config);
        let info = info(1);

        executor.execute_one(&script, &info, &(), &registry).unwrap();

        let statements = db.statements();
        assert!(statements.iter().any(|s| s == "BEGIN"));
        assert!(statements.iter().any(|s| s == "COMMIT"));
        assert!(statements.iter().any(|s| s.contains("create table a")));
    }

    #[test]
    fn none_mode_issues_no_transaction_control() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_a.up.sql");
        std::fs::write(&path, "create table a (id int);").unwrap();

        let db = InMemoryDb::new();
        let registry = LoaderRegistry::with_defaults();
        let script = MigrationScript::new(1, "1_a.up.sql".into(), path, None);

        let config = TransactionConfig { mode: TransactionMode::None, ..TransactionConfig::default() };
        let executor = Executor::new(&db, &config);
        let info = info(1);

        executor.execute_one(&script, &info, &(), &registry).unwrap();

        let statements = db.statements();
        assert!(!statements.iter().any(|s| s == "BEGIN"));
    }

    #[test]
    fn commit_retries_and_gives_up_after_configured_attempts() {
        let db = InMemoryDb::new();
        db.fail_on("COMMIT", "commit conflict");

        let config = TransactionConfig {
            mode: TransactionMode::PerMigration,
            retries: 2,
            retry_delay: Duration::from_millis(1),
            ..TransactionConfig::default()
        };
        let executor = Executor::new(&db, &config);

        let err = executor.commit();
        assert!(err.is_err());
    }

    #[test]
    fn execution_failure_issues_rollback_under_per_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_a.up.sql");
        std::fs::write(&path, "create table a (id int);").unwrap();

        let db = InMemoryDb::new();
        db.fail_on("create table", "syntax error");

        let registry = LoaderRegistry::with_defaults();
        let script = MigrationScript::new(1, "1_a.up.sql".into(), path, None);
        let config = TransactionConfig { mode: TransactionMode::PerMigration, ..TransactionConfig::default() };
        let executor = Executor::new(&db, &config);
        let info = info(1);

        let result = executor.execute_one(&script, &info, &(), &registry);
        assert!(result.is_err());
        assert!(db.statements().iter().any(|s| s == "ROLLBACK"));
    }
}
