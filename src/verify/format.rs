// dbbackup/src/verify/format.rs
//
// Structural plausibility checks. Nothing here restores data: engines with a
// listing facility are asked for their table of contents, the rest are
// inspected statically.
use flate2::bufread::MultiGzDecoder;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::Engine;
use crate::config::VerificationConfig;
use crate::errors::{BackupError, Result};
use crate::utils::{ToolOutput, find_executable, run_tool};

const HEADER_WINDOW_BYTES: usize = 8 * 1024;
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const PG_CUSTOM_MAGIC: &[u8] = b"PGDMP";

const POSTGRES_SIGNATURES: &[&str] = &["-- PostgreSQL database dump"];
const MYSQL_SIGNATURES: &[&str] = &["-- MySQL dump", "-- MariaDB dump"];
const ANY_SQL_SIGNATURES: &[&str] = &[
    "-- PostgreSQL database dump",
    "-- MySQL dump",
    "-- MariaDB dump",
];

/// Structural units found in a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub unit: &'static str,
    /// Unit names in first-seen order, without duplicates.
    pub units: Vec<String>,
    /// Set when the tool exited unsuccessfully but still produced a listing.
    pub warning: Option<String>,
}

impl Listing {
    fn new(unit: &'static str, names: impl IntoIterator<Item = String>, warning: Option<String>) -> Self {
        let mut units: Vec<String> = Vec::new();
        for name in names {
            if !units.contains(&name) {
                units.push(name);
            }
        }
        Self { unit, units, warning }
    }
}

/// Format checker selected from the engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChecker {
    /// `pg_restore --list` for custom/tar archives, static inspection for plain SQL.
    Postgres,
    /// Static inspection of a mysqldump/mariadb-dump SQL file.
    Mysql,
    /// `mongorestore --dryRun` against an archive.
    Mongodb,
    /// Static inspection accepting any known SQL dump header.
    StaticHeader,
}

impl FormatChecker {
    pub fn for_engine(engine: Engine) -> Self {
        match engine {
            Engine::Postgres => FormatChecker::Postgres,
            Engine::Mysql => FormatChecker::Mysql,
            Engine::Mongodb => FormatChecker::Mongodb,
            Engine::Other => FormatChecker::StaticHeader,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FormatChecker::Postgres => "PostgreSQL",
            FormatChecker::Mysql => "MySQL",
            FormatChecker::Mongodb => "MongoDB",
            FormatChecker::StaticHeader => "SQL dump",
        }
    }

    /// Lists the tables or collections in the backup.
    pub async fn list(&self, path: &Path, config: &VerificationConfig) -> Result<Listing> {
        let header = read_header(path)?;
        match self {
            FormatChecker::Postgres if is_pg_archive(&header) => list_with_pg_restore(path, config).await,
            FormatChecker::Postgres => inspect_sql_dump(path, POSTGRES_SIGNATURES),
            FormatChecker::Mysql => inspect_sql_dump(path, MYSQL_SIGNATURES),
            FormatChecker::Mongodb => list_with_mongorestore(path, header.starts_with(GZIP_MAGIC), config).await,
            FormatChecker::StaticHeader => inspect_sql_dump(path, ANY_SQL_SIGNATURES),
        }
    }

    /// Runs [`list`](Self::list) and turns the listing into a pass message.
    /// A backup without any structural unit fails.
    pub async fn validate(&self, path: &Path, config: &VerificationConfig) -> Result<String> {
        let listing = self.list(path, config).await?;
        if listing.units.is_empty() {
            return Err(BackupError::NoStructuralUnits { unit: listing.unit });
        }
        let mut message = format!(
            "Valid {} backup format ({} {})",
            self.label(),
            listing.units.len(),
            listing.unit
        );
        if let Some(warning) = listing.warning {
            message.push_str(&format!("; warning: {}", warning));
        }
        Ok(message)
    }
}

fn open_error(path: &Path, e: std::io::Error) -> BackupError {
    BackupError::NotReadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut header = Vec::with_capacity(HEADER_WINDOW_BYTES);
    file.take(HEADER_WINDOW_BYTES as u64)
        .read_to_end(&mut header)
        .map_err(|e| open_error(path, e))?;
    Ok(header)
}

fn is_pg_archive(header: &[u8]) -> bool {
    // pg_dump -Fc starts with PGDMP; -Ft is a POSIX tar ("ustar" at offset 257).
    header.starts_with(PG_CUSTOM_MAGIC) || header.get(257..262) == Some(b"ustar".as_slice())
}

/// Opens `path` for line scanning, decompressing gzip transparently.
fn open_dump(path: &Path) -> Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| open_error(path, e))?);
    let gzipped = reader
        .fill_buf()
        .map_err(|e| open_error(path, e))?
        .starts_with(GZIP_MAGIC);
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Header signature match on the first 8 KiB, then a full scan for
/// `CREATE TABLE` statements.
fn inspect_sql_dump(path: &Path, signatures: &[&str]) -> Result<Listing> {
    let mut reader = open_dump(path)?;
    let unreadable = |e: std::io::Error| {
        BackupError::UnrecognizedFormat(format!("failed to read dump content: {}", e))
    };

    let mut header = Vec::with_capacity(HEADER_WINDOW_BYTES);
    (&mut reader)
        .take(HEADER_WINDOW_BYTES as u64)
        .read_to_end(&mut header)
        .map_err(unreadable)?;
    let header_text = String::from_utf8_lossy(&header);
    if !signatures.iter().any(|sig| header_text.contains(sig)) {
        return Err(BackupError::UnrecognizedFormat(format!(
            "no dump header ({}) in the first {} KiB",
            signatures.join(" / "),
            HEADER_WINDOW_BYTES / 1024
        )));
    }

    let mut content = Cursor::new(header).chain(reader);
    let mut tables = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if content.read_until(b'\n', &mut line).map_err(unreadable)? == 0 {
            break;
        }
        if let Some(name) = create_table_name(&String::from_utf8_lossy(&line)) {
            tables.push(name);
        }
    }

    debug!(path = %path.display(), tables = tables.len(), "static dump inspection complete");
    Ok(Listing::new("tables", tables, None))
}

/// Table name of a `CREATE TABLE` statement line, unquoted.
fn create_table_name(line: &str) -> Option<String> {
    let line = line.trim_start();
    let head = line.get(..12)?;
    if !head.eq_ignore_ascii_case("CREATE TABLE") {
        return None;
    }
    let mut rest = line[12..].trim_start();
    if rest.get(..13).is_some_and(|s| s.eq_ignore_ascii_case("IF NOT EXISTS")) {
        rest = rest[13..].trim_start();
    }
    let name: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(')
        .filter(|c| !matches!(c, '`' | '"' | '[' | ']'))
        .collect();
    (!name.is_empty()).then_some(name)
}

fn tool_rejected(tool: &str, output: &ToolOutput) -> BackupError {
    let stderr = output.stderr.trim();
    BackupError::ToolError {
        tool: tool.to_string(),
        detail: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr.to_string()
        },
    }
}

async fn list_with_pg_restore(path: &Path, config: &VerificationConfig) -> Result<Listing> {
    const TOOL: &str = "pg_restore";
    let program = find_executable(TOOL, config.tools.pg_restore.as_deref())?;
    let args = [OsString::from("--list"), path.as_os_str().to_os_string()];
    let output = run_tool(&program, TOOL, &args, config.tool_timeout).await?;

    if !output.status.success() && output.stdout.trim().is_empty() {
        return Err(tool_rejected(TOOL, &output));
    }
    let warning = (!output.status.success()).then(|| format!("{} exited with {}", TOOL, output.status));
    let listing = Listing::new("tables", parse_pg_restore_list(&output.stdout), warning);
    info!(path = %path.display(), tables = listing.units.len(), "pg_restore listing complete");
    Ok(listing)
}

/// `TABLE DATA` entries of a `pg_restore --list` table of contents, as
/// `schema.table`.
fn parse_pg_restore_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim_start().starts_with(';'))
        .filter_map(|line| line.split_once(" TABLE DATA "))
        .filter_map(|(_, rest)| {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(schema), Some(table)) if schema != "-" => Some(format!("{}.{}", schema, table)),
                (Some(_), Some(table)) => Some(table.to_string()),
                _ => None,
            }
        })
        .collect()
}

async fn list_with_mongorestore(path: &Path, gzipped: bool, config: &VerificationConfig) -> Result<Listing> {
    const TOOL: &str = "mongorestore";
    let program = find_executable(TOOL, config.tools.mongorestore.as_deref())?;
    let mut archive = OsString::from("--archive=");
    archive.push(path.as_os_str());
    let mut args = vec![archive];
    if gzipped {
        args.push(OsString::from("--gzip"));
    }
    args.push(OsString::from("--dryRun"));
    args.push(OsString::from("-v"));

    let output = run_tool(&program, TOOL, &args, config.tool_timeout).await?;
    // mongorestore logs its progress on stderr.
    let collections: Vec<String> = parse_mongorestore_output(&output.stdout)
        .into_iter()
        .chain(parse_mongorestore_output(&output.stderr))
        .collect();

    if !output.status.success() && collections.is_empty() {
        return Err(tool_rejected(TOOL, &output));
    }
    let warning = (!output.status.success()).then(|| format!("{} exited with {}", TOOL, output.status));
    let listing = Listing::new("collections", collections, warning);
    info!(path = %path.display(), collections = listing.units.len(), "mongorestore dry run complete");
    Ok(listing)
}

/// `database.collection` names mentioned on "restoring" lines. Only the
/// token right after `restoring` (or after `collection`, for index lines)
/// is considered.
fn parse_mongorestore_output(text: &str) -> Vec<String> {
    fn token_after<'a>(tokens: &[&'a str], keyword: &str) -> Option<&'a str> {
        tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case(keyword))
            .and_then(|i| tokens.get(i + 1).copied())
            .map(|t| t.trim_matches(|c: char| matches!(c, '\'' | '"' | ',' | '(' | ')' | ':')))
    }
    fn is_namespace(t: &str) -> bool {
        t.contains('.') && !t.contains('/') && !t.starts_with('.') && !t.ends_with('.')
    }

    let mut collections = Vec::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let found = match token_after(&tokens, "restoring") {
            Some(t) if t.eq_ignore_ascii_case("indexes") => token_after(&tokens, "collection"),
            other => other,
        };
        if let Some(name) = found.filter(|t| is_namespace(t)) {
            collections.push(name.to_string());
        }
    }
    collections
}
