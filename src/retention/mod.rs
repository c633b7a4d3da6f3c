// dbbackup/src/retention/mod.rs
//! Tiered retention of backup files.
//!
//! Planning is a pure function of the catalog, the policy and an injected
//! `now`; [`executor::execute`] is the only place that touches the disk.
//! Timestamps are naive local wall-clock values, the same clock the backup
//! filenames are written in.
pub(crate) mod executor;
pub(crate) mod stats;

use chrono::{Datelike, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::catalog::{Artifact, OwnerGroup};

pub use executor::{ExecutionReport, execute};
pub use stats::collect_stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Every backup younger than this many days is kept.
    pub keep_daily: u32,
    /// One backup per ISO week is kept for this many weeks.
    pub keep_weekly: u32,
    /// One backup per calendar month is kept for this many 30-day months.
    pub keep_monthly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionTier {
    Daily,
    Weekly,
    Monthly,
    Expired,
}

impl RetentionTier {
    pub fn keeps(&self) -> bool {
        !matches!(self, RetentionTier::Expired)
    }
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetentionTier::Daily => "DAILY",
            RetentionTier::Weekly => "WEEKLY",
            RetentionTier::Monthly => "MONTHLY",
            RetentionTier::Expired => "EXPIRED",
        })
    }
}

/// The decision for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub path: PathBuf,
    pub group: OwnerGroup,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub tier: RetentionTier,
    pub keep: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPlan {
    pub now: NaiveDateTime,
    pub policy: RetentionPolicy,
    /// Ordered by group, then newest first within a group.
    pub entries: Vec<PlanEntry>,
    /// Files outside the naming contract. They are never deleted.
    pub unclassified: Vec<PathBuf>,
    pub files_checked: usize,
    pub files_kept: usize,
    pub files_deleted: usize,
    pub space_freed_bytes: u64,
}

impl RetentionPlan {
    pub fn kept(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.keep)
    }

    pub fn discarded(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| !e.keep)
    }

    #[cfg(test)]
    pub fn entry(&self, path: &Path) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

struct Cutoffs {
    daily: NaiveDateTime,
    weekly: NaiveDateTime,
    monthly: NaiveDateTime,
}

impl Cutoffs {
    fn new(policy: &RetentionPolicy, now: NaiveDateTime) -> Self {
        Self {
            daily: days_before(now, i64::from(policy.keep_daily)),
            weekly: days_before(now, 7 * i64::from(policy.keep_weekly)),
            monthly: days_before(now, 30 * i64::from(policy.keep_monthly)),
        }
    }
}

// Saturates at the earliest representable time for absurdly long windows.
fn days_before(now: NaiveDateTime, days: i64) -> NaiveDateTime {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Assigns a tier to each timestamp of one group. `created` must be
/// sorted newest first; the first artifact seen in a bucket is its
/// representative, which makes it the most recent one.
fn assign_tiers(created: &[NaiveDateTime], cutoffs: &Cutoffs) -> Vec<RetentionTier> {
    // Anything at or after the daily cutoff is daily, including timestamps
    // ahead of `now` when the clock moved backwards.
    let mut tiers: Vec<RetentionTier> = created
        .iter()
        .map(|at| {
            if *at >= cutoffs.daily {
                RetentionTier::Daily
            } else {
                RetentionTier::Expired
            }
        })
        .collect();

    let mut weeks = HashSet::new();
    for (tier, at) in tiers.iter_mut().zip(created) {
        if *at < cutoffs.daily && *at >= cutoffs.weekly {
            let week = at.iso_week();
            if weeks.insert((week.year(), week.week())) {
                *tier = RetentionTier::Weekly;
            }
        }
    }

    // A daily backup older than the weekly cutoff still claims its month.
    let mut months = HashSet::new();
    for (tier, at) in tiers.iter_mut().zip(created) {
        if *at < cutoffs.weekly
            && *at >= cutoffs.monthly
            && months.insert((at.year(), at.month()))
            && *tier != RetentionTier::Daily
        {
            *tier = RetentionTier::Monthly;
        }
    }

    tiers
}

/// Builds the retention plan for every owner group found in `artifacts`.
pub fn plan(artifacts: &[Artifact], policy: &RetentionPolicy, now: NaiveDateTime) -> RetentionPlan {
    let mut groups: BTreeMap<&OwnerGroup, Vec<(&Artifact, NaiveDateTime)>> = BTreeMap::new();
    let mut seen: HashSet<&Path> = HashSet::new();
    let mut unclassified = Vec::new();

    for artifact in artifacts {
        if !seen.insert(artifact.path.as_path()) {
            warn!(path = %artifact.path.display(), "artifact listed twice; planning it once");
            continue;
        }
        match artifact.dated() {
            Some((group, created_at)) => groups.entry(group).or_default().push((artifact, created_at)),
            None => unclassified.push(artifact.path.clone()),
        }
    }
    unclassified.sort();

    let cutoffs = Cutoffs::new(policy, now);
    let mut entries = Vec::new();

    for (group, mut members) in groups {
        members.sort_by(|(a, a_at), (b, b_at)| b_at.cmp(a_at).then_with(|| a.path.cmp(&b.path)));
        let created: Vec<NaiveDateTime> = members.iter().map(|(_, at)| *at).collect();
        let tiers = assign_tiers(&created, &cutoffs);

        for ((artifact, created_at), tier) in members.into_iter().zip(tiers) {
            debug!(group = %group, file = %artifact.file_name(), tier = %tier, "retention decision");
            entries.push(PlanEntry {
                path: artifact.path.clone(),
                group: group.clone(),
                created_at,
                size_bytes: artifact.size_bytes,
                tier,
                keep: tier.keeps(),
            });
        }
    }

    let files_checked = entries.len();
    let files_kept = entries.iter().filter(|e| e.keep).count();
    let space_freed_bytes = entries.iter().filter(|e| !e.keep).map(|e| e.size_bytes).sum();

    RetentionPlan {
        now,
        policy: *policy,
        entries,
        unclassified,
        files_checked,
        files_kept,
        files_deleted: files_checked - files_kept,
        space_freed_bytes,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{Classification, parse_backup_name};
    use crate::catalog::filename::backup_file_name;
    use chrono::{NaiveDate, NaiveTime};

    pub(crate) fn at(y: i32, m: u32, d: u32, hh: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(hh, 0, 0))
            .expect("valid test timestamp")
    }

    pub(crate) fn artifact(database: &str, engine: &str, when: NaiveDateTime, size: u64) -> Artifact {
        let name = backup_file_name(database, engine, when, ".dump");
        Artifact {
            path: PathBuf::from("/backups").join(&name),
            size_bytes: size,
            modified: None,
            classification: Classification::Dated(parse_backup_name(&name).expect("canonical name parses")),
        }
    }

    fn unclassified(name: &str) -> Artifact {
        Artifact {
            path: PathBuf::from("/backups").join(name),
            size_bytes: 10,
            modified: Some(at(2000, 1, 1, 0)),
            classification: Classification::Unclassified { reason: "test".to_string() },
        }
    }

    fn tier_of(plan: &RetentionPlan, a: &Artifact) -> Option<RetentionTier> {
        plan.entry(&a.path).map(|e| e.tier)
    }

    #[test]
    fn test_ten_daily_backups_keep_seven_daily() {
        let now = at(2024, 6, 30, 12);
        let artifacts: Vec<Artifact> = (0..10)
            .map(|d| artifact("sales", "postgres", now - TimeDelta::days(d) - TimeDelta::hours(1), 100))
            .collect();
        let policy = RetentionPolicy { keep_daily: 7, keep_weekly: 0, keep_monthly: 0 };

        let plan = plan(&artifacts, &policy, now);
        let daily = plan.entries.iter().filter(|e| e.tier == RetentionTier::Daily).count();
        assert_eq!(daily, 7);
        assert_eq!(plan.files_checked, 10);
        assert_eq!(plan.files_deleted, 3);
        for a in &artifacts[7..] {
            assert_eq!(tier_of(&plan, a), Some(RetentionTier::Expired));
        }
    }

    #[test]
    fn test_older_daily_backups_fall_through_to_weekly_and_monthly() {
        // 2024-06-30 is a Sunday; days 7..9 back are Sun/Sat/Fri of the prior week.
        let now = at(2024, 6, 30, 12);
        let artifacts: Vec<Artifact> = (0..10)
            .map(|d| artifact("sales", "postgres", now - TimeDelta::days(d) - TimeDelta::hours(1), 100))
            .collect();
        let plan = plan(&artifacts, &RetentionPolicy::default(), now);

        assert_eq!(tier_of(&plan, &artifacts[7]), Some(RetentionTier::Weekly));
        assert_eq!(tier_of(&plan, &artifacts[8]), Some(RetentionTier::Expired));
        assert_eq!(tier_of(&plan, &artifacts[9]), Some(RetentionTier::Expired));
    }

    #[test]
    fn test_same_iso_week_keeps_latest() {
        // 2024-W03 runs Monday 2024-01-15 to Sunday 2024-01-21.
        let monday = artifact("sales", "postgres", at(2024, 1, 15, 2), 100);
        let wednesday = artifact("sales", "postgres", at(2024, 1, 17, 2), 100);
        let now = at(2024, 1, 30, 12);
        let policy = RetentionPolicy { keep_daily: 7, keep_weekly: 4, keep_monthly: 0 };

        let plan = plan(&[monday.clone(), wednesday.clone()], &policy, now);
        assert_eq!(tier_of(&plan, &wednesday), Some(RetentionTier::Weekly));
        assert_eq!(tier_of(&plan, &monday), Some(RetentionTier::Expired));
        assert_eq!(plan.files_kept, 1);
        assert_eq!(plan.space_freed_bytes, 100);
    }

    #[test]
    fn test_same_month_keeps_latest() {
        let early = artifact("crm", "mysql", at(2024, 3, 2, 1), 10);
        let mid = artifact("crm", "mysql", at(2024, 3, 14, 1), 20);
        let late = artifact("crm", "mysql", at(2024, 3, 28, 1), 30);
        let now = at(2024, 6, 1, 0);

        let plan = plan(&[early.clone(), late.clone(), mid.clone()], &RetentionPolicy::default(), now);
        assert_eq!(tier_of(&plan, &late), Some(RetentionTier::Monthly));
        assert_eq!(tier_of(&plan, &mid), Some(RetentionTier::Expired));
        assert_eq!(tier_of(&plan, &early), Some(RetentionTier::Expired));
        assert_eq!(plan.space_freed_bytes, 30);
    }

    #[test]
    fn test_week_bucket_losers_do_not_become_monthly() {
        // Both inside the weekly window; the loser must not be rescued by the monthly tier.
        let now = at(2024, 1, 30, 12);
        let monday = artifact("sales", "postgres", at(2024, 1, 15, 2), 1);
        let wednesday = artifact("sales", "postgres", at(2024, 1, 17, 2), 1);
        let plan = plan(&[monday.clone(), wednesday], &RetentionPolicy::default(), now);
        assert_eq!(tier_of(&plan, &monday), Some(RetentionTier::Expired));
    }

    #[test]
    fn test_daily_backup_claims_its_month_bucket() {
        // The daily window reaches past the weekly one, so May's newest
        // backup is DAILY and the older May backup has no bucket left.
        let now = at(2024, 6, 30, 12);
        let policy = RetentionPolicy { keep_daily: 60, keep_weekly: 1, keep_monthly: 12 };
        let daily_may = artifact("sales", "postgres", at(2024, 5, 10, 0), 100);
        let older_may = artifact("sales", "postgres", at(2024, 5, 1, 0), 100);
        let april = artifact("sales", "postgres", at(2024, 4, 20, 0), 100);

        let plan = plan(&[older_may.clone(), daily_may.clone(), april.clone()], &policy, now);
        assert_eq!(tier_of(&plan, &daily_may), Some(RetentionTier::Daily));
        assert_eq!(tier_of(&plan, &older_may), Some(RetentionTier::Expired));
        assert_eq!(tier_of(&plan, &april), Some(RetentionTier::Monthly));
        assert_eq!(plan.files_kept, 2);
    }

    #[test]
    fn test_beyond_monthly_window_is_expired() {
        let now = at(2024, 6, 1, 0);
        let ancient = artifact("sales", "postgres", at(2022, 1, 1, 0), 500);
        let plan = plan(&[ancient.clone()], &RetentionPolicy::default(), now);
        assert_eq!(tier_of(&plan, &ancient), Some(RetentionTier::Expired));
        assert_eq!(plan.space_freed_bytes, 500);
    }

    #[test]
    fn test_groups_are_independent() {
        let now = at(2024, 6, 1, 0);
        let sales = artifact("sales", "postgres", at(2024, 3, 10, 0), 1);
        let sales_newer = artifact("sales", "postgres", at(2024, 3, 20, 0), 1);
        let crm = artifact("crm", "postgres", at(2024, 3, 10, 0), 1);
        let sales_mysql = artifact("sales", "mysql", at(2024, 3, 10, 0), 1);

        let plan = plan(
            &[sales.clone(), sales_newer.clone(), crm.clone(), sales_mysql.clone()],
            &RetentionPolicy::default(),
            now,
        );
        assert_eq!(tier_of(&plan, &sales_newer), Some(RetentionTier::Monthly));
        assert_eq!(tier_of(&plan, &sales), Some(RetentionTier::Expired));
        assert_eq!(tier_of(&plan, &crm), Some(RetentionTier::Monthly));
        assert_eq!(tier_of(&plan, &sales_mysql), Some(RetentionTier::Monthly));
    }

    #[test]
    fn test_future_timestamps_are_daily() {
        let now = at(2024, 6, 1, 0);
        let future = artifact("sales", "postgres", at(2024, 6, 20, 0), 1);
        let plan = plan(&[future.clone()], &RetentionPolicy { keep_daily: 0, keep_weekly: 0, keep_monthly: 0 }, now);
        assert_eq!(tier_of(&plan, &future), Some(RetentionTier::Daily));
    }

    #[test]
    fn test_unclassified_files_are_never_planned() {
        let now = at(2024, 6, 1, 0);
        let stray = unclassified("manual-copy.dump");
        let old = artifact("sales", "postgres", at(2020, 1, 1, 0), 1);

        let plan = plan(&[stray.clone(), old], &RetentionPolicy::default(), now);
        assert_eq!(plan.unclassified, vec![stray.path.clone()]);
        assert!(plan.entry(&stray.path).is_none());
        assert!(plan.discarded().all(|e| e.path != stray.path));
        assert_eq!(plan.files_checked, 1);
    }

    #[test]
    fn test_duplicate_paths_are_planned_once() {
        let now = at(2024, 6, 1, 0);
        let a = artifact("sales", "postgres", at(2024, 5, 31, 0), 1);
        let plan = plan(&[a.clone(), a.clone()], &RetentionPolicy::default(), now);
        assert_eq!(plan.entries.len(), 1);
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_path() {
        let now = at(2024, 6, 1, 0);
        let when = at(2024, 3, 5, 0);
        let dump = artifact("sales", "postgres", when, 1);
        let mut sql = dump.clone();
        sql.path = sql.path.with_extension("sql");

        let forward = plan(&[dump.clone(), sql.clone()], &RetentionPolicy::default(), now);
        let backward = plan(&[sql.clone(), dump.clone()], &RetentionPolicy::default(), now);
        assert_eq!(forward, backward);
        assert_eq!(forward.kept().count(), 1);
        assert_eq!(tier_of(&forward, &dump), Some(RetentionTier::Monthly));
    }

    #[test]
    fn test_plan_is_deterministic_and_balanced() {
        let now = at(2024, 6, 15, 9);
        let mut artifacts = Vec::new();
        for (i, db) in ["sales", "crm", "billing"].iter().enumerate() {
            for h in 0..400u32 {
                let when = now - TimeDelta::hours(i64::from(h) * 29 + i as i64);
                artifacts.push(artifact(db, "postgres", when, u64::from(h) + 1));
            }
        }

        let first = plan(&artifacts, &RetentionPolicy::default(), now);
        let second = plan(&artifacts, &RetentionPolicy::default(), now);
        assert_eq!(first, second);
        assert_eq!(first.files_checked, first.files_kept + first.files_deleted);
        assert_eq!(first.files_checked, artifacts.len());

        // exactly one survivor per weekly and monthly bucket
        for group in ["sales", "crm", "billing"] {
            let mut weeks = HashSet::new();
            let mut months = HashSet::new();
            for e in first.entries.iter().filter(|e| e.group.database == group) {
                match e.tier {
                    RetentionTier::Weekly => {
                        let w = e.created_at.iso_week();
                        assert!(weeks.insert((w.year(), w.week())));
                    }
                    RetentionTier::Monthly => {
                        assert!(months.insert((e.created_at.year(), e.created_at.month())));
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_huge_windows_do_not_overflow() {
        let now = NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            NaiveTime::MIN,
        );
        let policy = RetentionPolicy { keep_daily: u32::MAX, keep_weekly: u32::MAX, keep_monthly: u32::MAX };
        let a = artifact("sales", "postgres", at(1990, 1, 1, 0), 1);
        let plan = plan(&[a.clone()], &policy, now);
        assert_eq!(tier_of(&plan, &a), Some(RetentionTier::Daily));
    }
}
