// dbbackup/src/verify/mod.rs
pub(crate) mod format;
pub(crate) mod history;
pub(crate) mod integrity;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::Engine;
use crate::config::VerificationConfig;
use crate::errors::BackupError;

pub use format::FormatChecker;
pub use history::{history, save_report};
pub use integrity::{check_file_integrity, compute_checksum};

pub const FILE_INTEGRITY: &str = "file_integrity";
pub const FORMAT_VALIDATION: &str = "format_validation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
    /// Error code of a failed check, see [`BackupError::code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CheckOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            code: None,
        }
    }

    pub fn fail(err: &BackupError) -> Self {
        Self {
            passed: false,
            message: err.to_string(),
            code: Some(err.code().to_string()),
        }
    }
}

/// Result of checking one backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub artifact_path: PathBuf,
    pub timestamp_checked: DateTime<Local>,
    pub engine: String,
    /// SHA-256 of the content, absent when it was never computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Checks in the order they ran, serialized as a JSON object.
    #[serde(with = "ordered_checks")]
    pub checks: Vec<(String, CheckOutcome)>,
    pub overall_status: OverallStatus,
    pub summary: String,
}

impl VerificationReport {
    pub fn check(&self, name: &str) -> Option<&CheckOutcome> {
        self.checks.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn passed(&self) -> bool {
        self.overall_status == OverallStatus::Passed
    }

    fn record(&mut self, name: &str, outcome: CheckOutcome) {
        match self.checks.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = outcome,
            None => self.checks.push((name.to_string(), outcome)),
        }
    }

    fn finish(mut self, status: OverallStatus, summary: &str) -> Self {
        self.overall_status = status;
        self.summary = summary.to_string();
        self
    }
}

/// Checks are kept as a vector so their order survives a JSON round trip.
mod ordered_checks {
    use super::CheckOutcome;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(checks: &[(String, CheckOutcome)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(checks.len()))?;
        for (name, outcome) in checks {
            map.serialize_entry(name, outcome)?;
        }
        map.end()
    }

    struct ChecksVisitor;

    impl<'de> Visitor<'de> for ChecksVisitor {
        type Value = Vec<(String, CheckOutcome)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of check name to outcome")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut checks = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, CheckOutcome>()? {
                checks.push(entry);
            }
            Ok(checks)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, CheckOutcome)>, D::Error> {
        deserializer.deserialize_map(ChecksVisitor)
    }
}

/// Verifies one backup file. Failures end up in the report; this never errors.
///
/// Integrity runs first and short-circuits the rest. A read failure while
/// hashing counts as an integrity failure. Every report is written to the
/// verification log unless it failed and `persist_failed_reports` is off.
pub async fn verify(path: &Path, engine: &str, config: &VerificationConfig) -> VerificationReport {
    let report = run_checks(path, engine, config).await;

    if report.passed() {
        info!(path = %path.display(), summary = %report.summary, "verification passed");
    } else {
        warn!(path = %path.display(), summary = %report.summary, "verification failed");
    }

    if report.passed() || config.persist_failed_reports {
        if let Err(e) = save_report(&report, &config.log_dir) {
            warn!(log_dir = %config.log_dir.display(), "could not save verification report: {}", e);
        }
    }
    report
}

async fn run_checks(path: &Path, engine: &str, config: &VerificationConfig) -> VerificationReport {
    let mut report = VerificationReport {
        artifact_path: path.to_path_buf(),
        timestamp_checked: Local::now(),
        engine: engine.to_string(),
        checksum: None,
        checks: Vec::new(),
        overall_status: OverallStatus::Failed,
        summary: String::new(),
    };

    match check_file_integrity(path, config.min_backup_bytes) {
        Ok(size) => report.record(FILE_INTEGRITY, CheckOutcome::pass(format!("File is readable ({} bytes)", size))),
        Err(e) => {
            report.record(FILE_INTEGRITY, CheckOutcome::fail(&e));
            return report.finish(OverallStatus::Failed, "File integrity check failed");
        }
    }

    match compute_checksum(path) {
        Ok(checksum) => report.checksum = Some(checksum),
        Err(e) => {
            report.record(FILE_INTEGRITY, CheckOutcome::fail(&e));
            return report.finish(OverallStatus::Failed, "File integrity check failed");
        }
    }

    let checker = FormatChecker::for_engine(Engine::from_token(engine));
    match checker.validate(path, config).await {
        Ok(message) => report.record(FORMAT_VALIDATION, CheckOutcome::pass(message)),
        Err(e) => {
            report.record(FORMAT_VALIDATION, CheckOutcome::fail(&e));
            return report.finish(OverallStatus::Failed, "Format validation failed");
        }
    }

    report.finish(OverallStatus::Passed, "All verification checks passed")
}
