// dbbackup/src/retention/executor.rs
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

use super::RetentionPlan;
use crate::errors::BackupError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// What applying a plan actually did.
///
/// `files_checked == files_kept + files_deleted + failures.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub dry_run: bool,
    pub files_checked: usize,
    pub files_kept: usize,
    pub files_deleted: usize,
    pub space_freed_bytes: u64,
    pub deleted_files: Vec<PathBuf>,
    /// Discarded files that were already gone; counted as deleted.
    pub already_absent: Vec<PathBuf>,
    pub failures: Vec<DeleteFailure>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes every artifact the plan discards, or only reports them when
/// `dry_run` is set. A failed deletion is recorded and the batch continues.
pub fn execute(plan: &RetentionPlan, dry_run: bool) -> ExecutionReport {
    let mut report = ExecutionReport {
        dry_run,
        files_checked: plan.files_checked,
        files_kept: plan.files_kept,
        ..ExecutionReport::default()
    };

    for entry in plan.discarded() {
        if dry_run {
            info!(path = %entry.path.display(), bytes = entry.size_bytes, tier = %entry.tier, "DRY-RUN: would delete backup");
        } else {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    info!(path = %entry.path.display(), bytes = entry.size_bytes, "deleted backup");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Someone else got there first; the file is gone either way.
                    info!(path = %entry.path.display(), "backup already absent");
                    report.already_absent.push(entry.path.clone());
                }
                Err(e) => {
                    let err = BackupError::DeleteFailed {
                        path: entry.path.clone(),
                        detail: e.to_string(),
                    };
                    warn!(code = err.code(), "{}", err);
                    report.failures.push(DeleteFailure {
                        path: entry.path.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            }
        }

        report.files_deleted += 1;
        report.space_freed_bytes += entry.size_bytes;
        report.deleted_files.push(entry.path.clone());
    }

    report
}
