// dbbackup/src/catalog/filename.rs
//
// Every piece of code that needs to know what a backup file is called goes
// through this module. Existing backups are grouped and dated from their
// names, so the accepted shapes may only ever grow.
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{BackupError, Result};

/// The `(database, engine)` pair a backup belongs to.
///
/// The engine is kept exactly as written in the filename, so `pg` and
/// `postgres` backups of the same database stay in separate groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerGroup {
    pub database: String,
    pub engine: String,
}

impl fmt::Display for OwnerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.database, self.engine)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupName {
    pub group: OwnerGroup,
    pub created_at: NaiveDateTime,
    pub extension: String,
}

fn backup_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<database>.+)_(?P<engine>[A-Za-z0-9-]+)_backup_(?P<date>\d{8})(?:_?(?P<time>\d{6}))?(?P<ext>\.[A-Za-z0-9][A-Za-z0-9.]*)$",
        )
        .expect("backup filename pattern is a valid regex")
    })
}

/// Parses `<database>_<engine>_backup_<timestamp><ext>`.
///
/// The timestamp is `YYYYMMDD`, `YYYYMMDDHHMMSS` or `YYYYMMDD_HHMMSS`; a
/// date-only token is taken as midnight. The database part may contain
/// underscores, the engine part may not.
pub fn parse_backup_name(file_name: &str) -> Result<BackupName> {
    let caps = backup_name_pattern()
        .captures(file_name)
        .ok_or_else(|| BackupError::UnparseableFilename(file_name.to_string()))?;

    let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d").map_err(|e| {
        BackupError::UnparseableFilename(format!("{} (invalid date: {})", file_name, e))
    })?;
    let time = match caps.name("time") {
        Some(t) => NaiveTime::parse_from_str(t.as_str(), "%H%M%S").map_err(|e| {
            BackupError::UnparseableFilename(format!("{} (invalid time: {})", file_name, e))
        })?,
        None => NaiveTime::MIN,
    };

    Ok(BackupName {
        group: OwnerGroup {
            database: caps["database"].to_string(),
            engine: caps["engine"].to_string(),
        },
        created_at: NaiveDateTime::new(date, time),
        extension: caps["ext"].to_string(),
    })
}

/// Builds the canonical filename for a backup taken at `at`.
#[cfg(test)]
pub(crate) fn backup_file_name(database: &str, engine: &str, at: NaiveDateTime, ext: &str) -> String {
    format!("{}_{}_backup_{}{}", database, engine, at.format("%Y%m%d%H%M%S"), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(hh, mm, ss))
            .expect("valid test timestamp")
    }

    #[test]
    fn test_parse_date_only_token() -> anyhow::Result<()> {
        let name = parse_backup_name("sales_postgres_backup_20240101.dump")?;
        assert_eq!(name.group.database, "sales");
        assert_eq!(name.group.engine, "postgres");
        assert_eq!(name.created_at, at(2024, 1, 1, 0, 0, 0));
        assert_eq!(name.extension, ".dump");
        Ok(())
    }

    #[test]
    fn test_parse_date_time_token() -> anyhow::Result<()> {
        let name = parse_backup_name("sales_mysql_backup_20240315083015.sql")?;
        assert_eq!(name.group.engine, "mysql");
        assert_eq!(name.created_at, at(2024, 3, 15, 8, 30, 15));
        Ok(())
    }

    #[test]
    fn test_parse_underscore_separated_time() -> anyhow::Result<()> {
        let name = parse_backup_name("testdb_postgres_backup_20251002_220000.dump")?;
        assert_eq!(name.created_at, at(2025, 10, 2, 22, 0, 0));
        Ok(())
    }

    #[test]
    fn test_database_name_with_underscores() -> anyhow::Result<()> {
        let name = parse_backup_name("hotel_rule_prod_mongodb_backup_20240101.archive")?;
        assert_eq!(name.group.database, "hotel_rule_prod");
        assert_eq!(name.group.engine, "mongodb");
        assert_eq!(name.group.to_string(), "hotel_rule_prod_mongodb");
        Ok(())
    }

    #[test]
    fn test_multi_part_extension() -> anyhow::Result<()> {
        let name = parse_backup_name("sales_mysql_backup_20240101.sql.gz")?;
        assert_eq!(name.extension, ".sql.gz");
        Ok(())
    }

    #[test]
    fn test_rejects_foreign_names() {
        for bad in [
            "notes.txt",
            "sales_postgres_20240101.dump",
            "sales_postgres_backup_2024011.dump",
            "sales_postgres_backup_2024010112.dump",
            "sales_postgres_backup_20240101",
            "_postgres_backup_20240101.dump",
        ] {
            let err = parse_backup_name(bad).expect_err(bad);
            assert_eq!(err.code(), "UNPARSEABLE_FILENAME", "{}", bad);
        }
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert!(parse_backup_name("sales_postgres_backup_20241340.dump").is_err());
        assert!(parse_backup_name("sales_postgres_backup_20240101256000.dump").is_err());
    }

    #[test]
    fn test_file_name_builder_matches_parser() -> anyhow::Result<()> {
        let when = at(2024, 1, 17, 9, 5, 0);
        let file = backup_file_name("sales", "postgres", when, ".dump");
        assert_eq!(file, "sales_postgres_backup_20240117090500.dump");
        assert_eq!(parse_backup_name(&file)?.created_at, when);
        Ok(())
    }
}
