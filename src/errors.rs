use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("File does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("File is not readable: {}: {detail}", path.display())]
    NotReadable { path: PathBuf, detail: String },

    #[error("File is too small ({size} bytes, minimum {min}), likely corrupted")]
    TooSmall { size: u64, min: u64 },

    #[error("{tool} executable not found: {detail}")]
    ToolMissing { tool: String, detail: String },

    #[error("Verification timed out: {tool} did not finish within {limit:?}")]
    ToolTimeout { tool: String, limit: Duration },

    #[error("{tool} rejected the backup: {detail}")]
    ToolError { tool: String, detail: String },

    #[error("No {unit} found in backup (possibly empty or corrupted)")]
    NoStructuralUnits { unit: &'static str },

    #[error("Unrecognized backup format: {0}")]
    UnrecognizedFormat(String),

    #[error("Filename does not match <database>_<engine>_backup_<timestamp><ext>: {0}")]
    UnparseableFilename(String),

    #[error("Failed to delete {}: {detail}", path.display())]
    DeleteFailed { path: PathBuf, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl BackupError {
    /// Stable machine-readable code written into verification reports.
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::NotFound { .. } => "NOT_FOUND",
            BackupError::NotReadable { .. } => "NOT_READABLE",
            BackupError::TooSmall { .. } => "TOO_SMALL",
            BackupError::ToolMissing { .. } => "TOOL_MISSING",
            BackupError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            BackupError::ToolError { .. } => "TOOL_ERROR",
            BackupError::NoStructuralUnits { .. } => "NO_STRUCTURAL_UNITS",
            BackupError::UnrecognizedFormat(_) => "UNRECOGNIZED_FORMAT",
            BackupError::UnparseableFilename(_) => "UNPARSEABLE_FILENAME",
            BackupError::DeleteFailed { .. } => "DELETE_FAILED",
            BackupError::Io(_) => "IO",
            BackupError::SerdeJson(_) => "SERDE_JSON",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failures_are_distinguishable() {
        let missing = BackupError::ToolMissing {
            tool: "pg_restore".to_string(),
            detail: "not in PATH".to_string(),
        };
        let timeout = BackupError::ToolTimeout {
            tool: "pg_restore".to_string(),
            limit: Duration::from_secs(30),
        };
        let rejected = BackupError::ToolError {
            tool: "pg_restore".to_string(),
            detail: "input file does not appear to be a valid archive".to_string(),
        };

        assert_ne!(missing.code(), timeout.code());
        assert_ne!(timeout.code(), rejected.code());
        assert!(timeout.to_string().contains("timed out"));
        assert!(missing.to_string().contains("not found"));
        assert!(rejected.to_string().contains("rejected"));
    }

    #[test]
    fn test_sub_second_timeout_is_reported_exactly() {
        let err = BackupError::ToolTimeout {
            tool: "mongorestore".to_string(),
            limit: Duration::from_millis(500),
        };
        assert!(err.to_string().ends_with("within 500ms"), "{}", err);

        let err = BackupError::ToolTimeout {
            tool: "pg_restore".to_string(),
            limit: Duration::from_secs(30),
        };
        assert!(err.to_string().ends_with("within 30s"), "{}", err);
    }

    #[test]
    fn test_too_small_message_carries_size() {
        let err = BackupError::TooSmall { size: 50, min: 100 };
        assert_eq!(err.code(), "TOO_SMALL");
        assert!(err.to_string().contains("50 bytes"));
    }
}
