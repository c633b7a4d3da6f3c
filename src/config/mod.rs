// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retention::RetentionPolicy;

const DEFAULT_BACKUP_DIR: &str = "backups";
const DEFAULT_VERIFICATION_LOG_DIR: &str = "logs/verifications";
const DEFAULT_EXTENSIONS: &[&str] = &[".dump", ".sql", ".archive"];
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MIN_BACKUP_BYTES: u64 = 100;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonVerificationOptions {
    pub tool_timeout_secs: Option<u64>,
    pub min_backup_bytes: Option<u64>,
    pub persist_failed_reports: Option<bool>,
    pub pg_restore_path: Option<PathBuf>,
    pub mongorestore_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRetentionOptions {
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_dir: Option<PathBuf>,
    pub verification_log_dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub verification: Option<JsonVerificationOptions>,
    pub retention: Option<JsonRetentionOptions>,
}

/// Explicit locations of the listing tools. `None` means look them up in PATH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub pg_restore: Option<PathBuf>,
    pub mongorestore: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub log_dir: PathBuf,
    pub tool_timeout: Duration,
    pub min_backup_bytes: u64,
    pub persist_failed_reports: bool,
    pub tools: ToolPaths,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_VERIFICATION_LOG_DIR),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            min_backup_bytes: DEFAULT_MIN_BACKUP_BYTES,
            persist_failed_reports: true,
            tools: ToolPaths::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backup_dir: PathBuf,
    pub extensions: Vec<String>,
    pub verification: VerificationConfig,
    pub retention: RetentionPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            verification: VerificationConfig::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Environment overrides, read once so tests can supply their own.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub backup_dir: Option<PathBuf>,
    pub verification_log_dir: Option<PathBuf>,
    pub tool_timeout_secs: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            backup_dir: non_empty("BACKUP_DIR").map(PathBuf::from),
            verification_log_dir: non_empty("VERIFICATION_LOG_DIR").map(PathBuf::from),
            tool_timeout_secs: non_empty("VERIFY_TIMEOUT_SECS"),
        }
    }
}

impl AppConfig {
    /// Loads `config_path` if it exists, then applies `.env`/environment overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenv::dotenv();

        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        Self::from_raw(raw, EnvOverrides::from_env())
    }

    pub fn from_raw(raw: RawJsonConfig, env: EnvOverrides) -> Result<Self> {
        let defaults = AppConfig::default();
        let verification_raw = raw.verification.unwrap_or_default();
        let retention_raw = raw.retention.unwrap_or_default();

        let tool_timeout_secs = match env.tool_timeout_secs {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("VERIFY_TIMEOUT_SECS must be a number of seconds, got '{}'", value))?,
            None => verification_raw
                .tool_timeout_secs
                .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
        };
        if tool_timeout_secs == 0 {
            anyhow::bail!("Verification tool timeout must be greater than zero seconds.");
        }

        let extensions = match raw.extensions {
            Some(exts) => parse_extensions(exts)?,
            None => defaults.extensions,
        };

        Ok(AppConfig {
            backup_dir: env
                .backup_dir
                .or(raw.backup_dir)
                .unwrap_or(defaults.backup_dir),
            extensions,
            verification: VerificationConfig {
                log_dir: env
                    .verification_log_dir
                    .or(raw.verification_log_dir)
                    .unwrap_or(defaults.verification.log_dir),
                tool_timeout: Duration::from_secs(tool_timeout_secs),
                min_backup_bytes: verification_raw
                    .min_backup_bytes
                    .unwrap_or(DEFAULT_MIN_BACKUP_BYTES),
                persist_failed_reports: verification_raw.persist_failed_reports.unwrap_or(true),
                tools: ToolPaths {
                    pg_restore: verification_raw.pg_restore_path,
                    mongorestore: verification_raw.mongorestore_path,
                },
            },
            retention: RetentionPolicy {
                keep_daily: retention_raw.keep_daily.unwrap_or(defaults.retention.keep_daily),
                keep_weekly: retention_raw.keep_weekly.unwrap_or(defaults.retention.keep_weekly),
                keep_monthly: retention_raw
                    .keep_monthly
                    .unwrap_or(defaults.retention.keep_monthly),
            },
        })
    }
}

fn parse_extensions(exts: Vec<String>) -> Result<Vec<String>> {
    let exts: Vec<String> = exts.into_iter().map(|e| e.trim().to_string()).collect();
    if exts.is_empty() {
        return Err(anyhow::anyhow!("extensions cannot be empty in config.json."));
    }
    if let Some(bad) = exts.iter().find(|e| !e.starts_with('.') || e.len() < 2) {
        return Err(anyhow::anyhow!(
            "Invalid extension '{}' in config.json: extensions must start with '.' (e.g. \".dump\")",
            bad
        ));
    }
    Ok(exts)
}
