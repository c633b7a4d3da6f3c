use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::catalog::Artifact;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgeBreakdown {
    pub last_day: usize,
    pub last_week: usize,
    pub last_month: usize,
    pub older: usize,
    /// Neither a filename timestamp nor an mtime was available.
    pub undated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size_bytes: u64,
    pub unclassified: usize,
    /// Backup count per owner group (`database_engine`).
    pub per_group: BTreeMap<String, usize>,
    pub by_age: AgeBreakdown,
}

/// Summarizes a catalog by age, using filename timestamps where available.
pub fn collect_stats(artifacts: &[Artifact], now: NaiveDateTime) -> BackupStats {
    let mut stats = BackupStats {
        total_backups: artifacts.len(),
        total_size_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
        ..BackupStats::default()
    };

    for artifact in artifacts {
        match artifact.owner_group() {
            Some(group) => *stats.per_group.entry(group.to_string()).or_default() += 1,
            None => stats.unclassified += 1,
        }

        let Some(created_at) = artifact.created_at() else {
            stats.by_age.undated += 1;
            continue;
        };
        match (now - created_at).num_days() {
            days if days < 1 => stats.by_age.last_day += 1,
            days if days < 7 => stats.by_age.last_week += 1,
            days if days < 30 => stats.by_age.last_month += 1,
            _ => stats.by_age.older += 1,
        }
    }

    stats
}
