// dbbackup/src/catalog/mod.rs
pub(crate) mod engine;
pub(crate) mod filename;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use engine::Engine;
pub use filename::{BackupName, OwnerGroup, parse_backup_name};

/// How a scanned file relates to the backup naming contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Name parsed; the file takes part in retention.
    Dated(BackupName),
    /// Name did not parse; the file is reported but never retired.
    Unclassified { reason: String },
}

/// A single backup file as observed during one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Filesystem mtime in local time, when the platform reports one.
    pub modified: Option<NaiveDateTime>,
    pub classification: Classification,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Group and timestamp used for retention; `None` for unclassified files.
    pub fn dated(&self) -> Option<(&OwnerGroup, NaiveDateTime)> {
        match &self.classification {
            Classification::Dated(name) => Some((&name.group, name.created_at)),
            Classification::Unclassified { .. } => None,
        }
    }

    pub fn owner_group(&self) -> Option<&OwnerGroup> {
        self.dated().map(|(group, _)| group)
    }

    /// Filename timestamp, falling back to mtime. The fallback is only
    /// ever used for reporting, never for retention decisions.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.dated().map(|(_, at)| at).or(self.modified)
    }

    pub fn engine(&self) -> Option<Engine> {
        self.owner_group().map(|g| Engine::from_token(&g.engine))
    }
}

/// Lists backup files directly inside `directory` (no recursion).
///
/// A file is considered when its name ends with one of `extensions`
/// (e.g. `.dump`, `.sql.gz`). Files that do not follow the naming contract
/// are returned as [`Classification::Unclassified`]. A missing directory
/// yields an empty catalog.
pub fn scan(directory: &Path, extensions: &[String]) -> Result<Vec<Artifact>> {
    if !directory.exists() {
        warn!(dir = %directory.display(), "backup directory does not exist; nothing to scan");
        return Ok(Vec::new());
    }
    if !directory.is_dir() {
        anyhow::bail!("Backup path is not a directory: {}", directory.display());
    }

    let mut artifacts = Vec::new();
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %directory.display(), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !extensions.iter().any(|ext| file_name.ends_with(ext.as_str())) {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to read metadata for {}", entry.path().display()))?;
        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Local>::from(t).naive_local());

        let classification = match parse_backup_name(&file_name) {
            Ok(name) => Classification::Dated(name),
            Err(e) => {
                debug!(file = %file_name, "unclassifiable backup file: {}", e);
                Classification::Unclassified { reason: e.to_string() }
            }
        };

        artifacts.push(Artifact {
            path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified,
            classification,
        });
    }

    debug!(dir = %directory.display(), count = artifacts.len(), "catalog scan complete");
    Ok(artifacts)
}
