// dbbackup/src/utils/mod.rs
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use which::which;

use crate::errors::{BackupError, Result};

/// Resolves a client tool: the configured path when one is given, otherwise PATH.
pub fn find_executable(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(BackupError::ToolMissing {
            tool: name.to_string(),
            detail: format!("configured path {} does not exist", path.display()),
        }),
        None => which(name).map_err(|e| BackupError::ToolMissing {
            tool: name.to_string(),
            detail: format!(
                "{} in PATH. Please ensure the database client tools are installed or set the tool path in config.json",
                e
            ),
        }),
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` to completion, killing it if it outlives `limit`.
pub async fn run_tool(program: &Path, tool: &str, args: &[OsString], limit: Duration) -> Result<ToolOutput> {
    debug!(tool, program = %program.display(), ?args, "running listing tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => BackupError::ToolMissing {
                tool: tool.to_string(),
                detail: e.to_string(),
            },
            _ => BackupError::ToolError {
                tool: tool.to_string(),
                detail: format!("failed to start: {}", e),
            },
        })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(BackupError::ToolError {
            tool: tool.to_string(),
            detail: format!("failed while waiting for output: {}", e),
        }),
        // Dropping the future drops the child, which kills it.
        Err(_) => Err(BackupError::ToolTimeout {
            tool: tool.to_string(),
            limit,
        }),
    }
}

/// Formats a byte count the way status lines print sizes.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
