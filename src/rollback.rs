//! Rollback Coordinator (§4.8): undoes a failed migration attempt according
//! to the configured [`RollbackStrategy`].
//!
//! Grounded on refinery's reverse-order apply/undo bookkeeping, adapted to
//! the pluggable `down`/backup-restore duality named in the design.

use std::any::Any;
use chrono::Utc;

use crate::backup::BackupService;
use crate::config::RollbackStrategy;
use crate::error::CoreError;
use crate::interfaces::DbHandle;
use crate::ledger::{MigrationInfo, SchemaVersionService};
use crate::loader::ExecutionContext;
use crate::script::MigrationScript;
#[cfg(test)]
use crate::loader::Runnable;

pub struct RollbackCoordinator<'a> {
    db: &'a dyn DbHandle,
    ledger: &'a SchemaVersionService,
    backup: &'a BackupService,
    handler: &'a (dyn Any + Send + Sync),
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(
        db: &'a dyn DbHandle,
        ledger: &'a SchemaVersionService,
        backup: &'a BackupService,
        handler: &'a (dyn Any + Send + Sync),
    ) -> Self {
        Self { db, ledger, backup, handler }
    }

    /// Returns the names of scripts successfully undone (DOWN strategies
    /// only; empty for BACKUP since that undoes the whole database at once).
    pub fn rollback(
        &self,
        strategy: RollbackStrategy,
        failed: &MigrationScript,
        executed: &[(&MigrationScript, MigrationInfo)],
        backup_path: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        match strategy {
            RollbackStrategy::None => Ok(Vec::new()),
            RollbackStrategy::Backup => self.rollback_backup(backup_path).map(|()| Vec::new()),
            RollbackStrategy::Down => self.rollback_down(failed, executed),
            RollbackStrategy::Both => match self.rollback_down(failed, executed) {
                Ok(undone) => Ok(undone),
                Err(down_err) => {
                    log::warn!("DOWN rollback failed, falling back to BACKUP: {down_err}");
                    self.rollback_backup(backup_path).map(|()| Vec::new())
                }
            },
        }
    }

    fn rollback_backup(&self, backup_path: Option<&str>) -> Result<(), CoreError> {
        let path = backup_path.ok_or(CoreError::MissingExistingBackupPath)?;
        self.backup.restore(path)
    }

    /// The failed script's `down` runs first (best-effort), then each
    /// previously-executed script's `down` runs in reverse insertion order
    /// (strict — a missing `down` there is a hard error, per §4.8).
    fn rollback_down(
        &self,
        failed: &MigrationScript,
        executed: &[(&MigrationScript, MigrationInfo)],
    ) -> Result<Vec<String>, CoreError> {
        self.run_down(failed, false)?;

        let mut undone = Vec::with_capacity(executed.len());
        for (script, info) in executed.iter().rev() {
            self.run_down(script, true)?;
            self.ledger.remove(info.timestamp)?;
            undone.push((*script).name.clone());
        }
        Ok(undone)
    }

    /// `strict = false` (the failed script): a missing or failing `down` is
    /// logged as a warning. `strict = true` (previously-executed scripts): a
    /// missing or failing `down` is a [`CoreError::RollbackIncomplete`].
    fn run_down(&self, script: &MigrationScript, strict: bool) -> Result<(), CoreError> {
        let has_down = script.with_loaded(|r| r.has_down()).unwrap_or(false);
        if !has_down {
            return if strict {
                Err(CoreError::RollbackIncomplete {
                    script: script.name.clone(),
                    reason: "no down() available".into(),
                })
            } else {
                log::warn!(
                    "no down() available for failed script '{}'; its partial effects were not undone",
                    script.name
                );
                Ok(())
            };
        }

        let synthetic_info = MigrationInfo {
            timestamp: script.timestamp,
            name: script.name.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            username: String::new(),
            result: String::new(),
            content_hash: script.content_hash.clone(),
        };
        let ctx = ExecutionContext { db: self.db, info: &synthetic_info, handler: self.handler };

        match script.with_loaded(|r| r.down(&ctx)) {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) if strict => Err(CoreError::RollbackIncomplete {
                script: script.name.clone(),
                reason: e.to_string(),
            }),
            Some(Err(e)) => {
                log::warn!("down() failed for failed script '{}': {e}", script.name);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupService;
    use crate::ledger::SchemaVersionService;
    use crate::loader::ExecutionContext;
    use crate::testing::{InMemoryBackup, InMemoryDb, InMemoryLedger};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Down(bool);
    impl Runnable for Down {
        fn up(&self, _ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
            Ok("up".into())
        }
        fn down(&self, ctx: &ExecutionContext<'_>) -> Result<String, CoreError> {
            ctx.db.query("rollback statement")?;
            Ok("down".into())
        }
        fn has_down(&self) -> bool {
            self.0
        }
    }

    fn script(timestamp: i64, has_down: bool) -> MigrationScript {
        let s = MigrationScript::new(timestamp, format!("{timestamp}.up.sql"), PathBuf::from("x"), None);
        s.set_loaded(Box::new(Down(has_down)));
        s
    }

    fn info(timestamp: i64) -> MigrationInfo {
        MigrationInfo {
            timestamp,
            name: format!("{timestamp}.up.sql"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            username: "tester".into(),
            result: String::new(),
            content_hash: None,
        }
    }

    #[test]
    fn none_strategy_is_a_no_op() {
        let db = InMemoryDb::new();
        let ledger = SchemaVersionService::new(Arc::new(InMemoryLedger::new()));
        let backup = BackupService::new(Arc::new(InMemoryBackup::new()));
        let coordinator = RollbackCoordinator::new(&db, &ledger, &backup, &());

        let failed = script(3, false);
        let undone = coordinator.rollback(RollbackStrategy::None, &failed, &[], None).unwrap();
        assert!(undone.is_empty());
    }

    #[test]
    fn down_strategy_undoes_in_reverse_order() {
        let db = InMemoryDb::new();
        let in_memory_ledger = Arc::new(InMemoryLedger::new());
        in_memory_ledger.seed(vec![info(1), info(2)]);
        let ledger = SchemaVersionService::new(in_memory_ledger);
        let backup = BackupService::new(Arc::new(InMemoryBackup::new()));
        let coordinator = RollbackCoordinator::new(&db, &ledger, &backup, &());

        let failed = script(3, false);
        let executed = vec![(script(1, true), info(1)), (script(2, true), info(2))];

        let undone = coordinator.rollback(RollbackStrategy::Down, &failed, &executed, None).unwrap();
        assert_eq!(undone, vec!["2.up.sql".to_string(), "1.up.sql".to_string()]);
    }

    #[test]
    fn down_strategy_errors_when_an_executed_script_has_no_down() {
        let db = InMemoryDb::new();
        let ledger = SchemaVersionService::new(Arc::new(InMemoryLedger::new()));
        let backup = BackupService::new(Arc::new(InMemoryBackup::new()));
        let coordinator = RollbackCoordinator::new(&db, &ledger, &backup, &());

        let failed = script(3, false);
        let executed = vec![(script(1, false), info(1))];

        let err = coordinator.rollback(RollbackStrategy::Down, &failed, &executed, None);
        assert!(matches!(err, Err(CoreError::RollbackIncomplete { .. })));
    }

    #[test]
    fn backup_strategy_requires_a_backup_path() {
        let db = InMemoryDb::new();
        let ledger = SchemaVersionService::new(Arc::new(InMemoryLedger::new()));
        let backup = BackupService::new(Arc::new(InMemoryBackup::new()));
        let coordinator = RollbackCoordinator::new(&db, &ledger, &backup, &());

        let failed = script(3, false);
        let err = coordinator.rollback(RollbackStrategy::Backup, &failed, &[], None);
        assert!(matches!(err, Err(CoreError::MissingExistingBackupPath)));
    }

    #[test]
    fn both_strategy_falls_back_to_backup_when_down_fails() {
        let db = InMemoryDb::new();
        let ledger = SchemaVersionService::new(Arc::new(InMemoryLedger::new()));
        let in_memory_backup = Arc::new(InMemoryBackup::new());
        let backup = BackupService::new(in_memory_backup.clone());
        let coordinator = RollbackCoordinator::new(&db, &ledger, &backup, &());

        let failed = script(3, false);
        let executed = vec![(script(1, false), info(1))];

        let undone = coordinator
            .rollback(RollbackStrategy::Both, &failed, &executed, Some("mem-backup-1"))
            .unwrap();
        assert!(undone.is_empty());
        assert_eq!(in_memory_backup.restores(), vec!["mem-backup-1".to_string()]);
    }
}
