//! Validator (§4.6): pre-execution checks and the optional file-integrity check.

use crate::checksum::calculate_checksum;
use crate::config::{Configuration, TransactionMode};
use crate::error::CoreError;
use crate::ledger::MigrationInfo;
use crate::loader::LoaderRegistry;
use crate::scanner::ScanResult;

pub struct Validator;

impl Validator {
    /// Runs before any backup is created. A failure here means the
    /// Orchestrator transitions straight to `RELEASE_LOCK -> END_FAIL`
    /// without engaging the Rollback Coordinator (§4.1 fail-fast rule).
    pub fn validate_pre_execution(
        scan: &ScanResult,
        config: &Configuration,
        registry: &LoaderRegistry,
        ledger: &[MigrationInfo],
    ) -> Result<(), CoreError> {
        if config.transaction.mode != TransactionMode::None {
            let pending_paths = scan.pending.iter().map(|s| s.filepath.as_path());
            if registry.is_hybrid(pending_paths) {
                let files = scan.pending.iter().map(|s| s.name.clone()).collect();
                return Err(CoreError::HybridTransactionConflict {
                    files,
                    mode: config.transaction.mode.to_string(),
                });
            }
        }

        let high_water_mark = ScanResult::high_water_mark(ledger);
        for script in &scan.pending {
            if script.timestamp <= high_water_mark {
                return Err(CoreError::OrderingViolation {
                    timestamp: script.timestamp,
                    high_water_mark,
                });
            }
        }

        Ok(())
    }

    /// Recomputes checksums for every migrated file and compares against
    /// the ledger. Runs after lock acquisition but still before any backup
    /// (§4.6: "integrity failures abort after lock acquisition but still
    /// before backup").
    pub fn validate_integrity(scan: &ScanResult, ledger: &[MigrationInfo]) -> Result<(), CoreError> {
        for script in &scan.migrated {
            let Some(record) = ledger.iter().find(|m| m.timestamp == script.timestamp) else {
                continue;
            };
            let Some(stored) = &record.content_hash else {
                continue;
            };
            let current = calculate_checksum(&script.filepath)?;
            if &current != stored {
                return Err(CoreError::ChecksumMismatch {
                    name: script.name.clone(),
                    stored: stored.clone(),
                    current,
                });
            }
        }
        Ok(())
    }
}
