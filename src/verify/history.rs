// dbbackup/src/verify/history.rs
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::VerificationReport;
use crate::errors::{BackupError, Result};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Report file stem: `{stem}_verification_{YYYYmmdd_HHMMSS_mmm}`.
fn report_file_stem(report: &VerificationReport) -> String {
    let stem = report
        .artifact_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    format!(
        "{}_verification_{}",
        stem,
        report.timestamp_checked.format("%Y%m%d_%H%M%S_%3f")
    )
}

/// Creates the report file, adding `_1`, `_2`, ... to the name when a report
/// from the same millisecond already exists.
fn create_report_file(log_dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{}.json", stem),
            n => format!("{}_{}.json", stem, n),
        };
        let path = log_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(BackupError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free report name for {} in {}", stem, log_dir.display()),
    )))
}

/// Writes `report` as pretty JSON under `log_dir`. Never overwrites an
/// existing report.
pub fn save_report(report: &VerificationReport, log_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let (path, file) = create_report_file(log_dir, &report_file_stem(report))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    debug!(path = %path.display(), "verification report saved");
    Ok(path)
}

fn same_artifact(recorded: &Path, wanted: &Path) -> bool {
    if recorded == wanted {
        return true;
    }
    match (recorded.canonicalize(), wanted.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Saved reports, newest first, optionally only those for `backup_path`.
/// Unreadable report files are skipped with a warning.
pub fn history(log_dir: &Path, backup_path: Option<&Path>) -> Result<Vec<VerificationReport>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in WalkDir::new(log_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {}", log_dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let parsed = File::open(path)
            .map_err(BackupError::from)
            .and_then(|f| Ok(serde_json::from_reader::<_, VerificationReport>(BufReader::new(f))?));
        match parsed {
            Ok(report) => {
                if backup_path.is_none_or(|wanted| same_artifact(&report.artifact_path, wanted)) {
                    reports.push(report);
                }
            }
            Err(e) => warn!(path = %path.display(), "skipping unreadable verification report: {}", e),
        }
    }

    reports.sort_by(|a, b| b.timestamp_checked.cmp(&a.timestamp_checked));
    Ok(reports)
}
