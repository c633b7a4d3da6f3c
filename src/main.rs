//! Database Backup Retention/Verification Tool
//!
//! Provides CLI interface for tiered retention and integrity checks over a
//! directory of database dump files

// dbbackup/src/main.rs
mod catalog;
mod config;
mod errors;
mod retention;
mod utils;
mod verify;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use catalog::{Classification, Engine, parse_backup_name};
use config::AppConfig;
use retention::{ExecutionReport, RetentionPlan};
use utils::format_size;
use verify::{FormatChecker, VerificationReport};

#[derive(Parser, Debug)]
#[command(name = "dbbackup")]
#[command(about = "Retention and verification for database backup files", version)]
struct Cli {
    /// Path to the JSON config file (optional; defaults apply when absent)
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Backup directory, overriding config.json and BACKUP_DIR
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List backup files, including ones that do not follow the naming contract
    List,

    /// Apply the daily/weekly/monthly retention policy
    Retention {
        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        keep_daily: Option<u32>,

        #[arg(long)]
        keep_weekly: Option<u32>,

        #[arg(long)]
        keep_monthly: Option<u32>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Verify one backup file (checksum and format check)
    Verify {
        file: PathBuf,

        /// Engine of the backup (defaults to the one in the filename)
        #[arg(long, short = 'e')]
        engine: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show saved verification reports, newest first
    VerifyHistory {
        /// Only reports for this backup file
        #[arg(long)]
        backup_file: Option<PathBuf>,
    },

    /// Backup counts and sizes by age
    Stats,

    /// List the tables or collections inside a backup
    ListTables {
        file: PathBuf,

        #[arg(long, short = 'e')]
        engine: Option<String>,
    },
}

/// Main entry point for the retention/verification tool
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbbackup=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run_app(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let mut app_config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load application configuration from {}", cli.config.display()))?;
    if let Some(dir) = cli.dir {
        app_config.backup_dir = dir;
    }

    match cli.command {
        Commands::List => run_list(&app_config),
        Commands::Retention {
            dry_run,
            keep_daily,
            keep_weekly,
            keep_monthly,
            json,
        } => {
            let policy = &mut app_config.retention;
            policy.keep_daily = keep_daily.unwrap_or(policy.keep_daily);
            policy.keep_weekly = keep_weekly.unwrap_or(policy.keep_weekly);
            policy.keep_monthly = keep_monthly.unwrap_or(policy.keep_monthly);
            run_retention(&app_config, dry_run, json).context("Retention process failed")
        }
        Commands::Verify { file, engine, json } => run_verify(&app_config, &file, engine, json).await,
        Commands::VerifyHistory { backup_file } => run_verify_history(&app_config, backup_file.as_deref()),
        Commands::Stats => run_stats(&app_config),
        Commands::ListTables { file, engine } => run_list_tables(&app_config, &file, engine).await,
    }
}

fn scan_backups(app_config: &AppConfig) -> Result<Vec<catalog::Artifact>> {
    catalog::scan(&app_config.backup_dir, &app_config.extensions)
        .with_context(|| format!("Failed to scan backup directory {}", app_config.backup_dir.display()))
}

/// Engine token from `--engine`, or from the `<database>_<engine>_backup_...` filename.
fn resolve_engine(file: &Path, engine: Option<String>) -> Result<String> {
    if let Some(engine) = engine {
        return Ok(engine);
    }
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = parse_backup_name(&file_name)
        .with_context(|| format!("Cannot infer the engine of {}; pass --engine", file.display()))?;
    Ok(name.group.engine)
}

fn run_list(app_config: &AppConfig) -> Result<ExitCode> {
    let artifacts = scan_backups(app_config)?;
    if artifacts.is_empty() {
        println!("ℹ️ No backups found in {}", app_config.backup_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("📦 {} backup(s) in {}:", artifacts.len(), app_config.backup_dir.display());
    for artifact in &artifacts {
        match &artifact.classification {
            Classification::Dated(name) => println!(
                "  {}  {}  {}  [{}, {}]",
                name.created_at.format("%Y-%m-%d %H:%M:%S"),
                format_size(artifact.size_bytes),
                artifact.file_name(),
                name.group,
                artifact.engine().unwrap_or(Engine::Other),
            ),
            Classification::Unclassified { reason } => println!(
                "  ⚠️ {}  {}  (unclassified: {})",
                format_size(artifact.size_bytes),
                artifact.file_name(),
                reason
            ),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_retention(app_config: &AppConfig, dry_run: bool, json: bool) -> Result<ExitCode> {
    let policy = app_config.retention;
    if !json {
        println!(
            "🧹 Applying retention in {} (daily: {}, weekly: {}, monthly: {})",
            app_config.backup_dir.display(),
            policy.keep_daily,
            policy.keep_weekly,
            policy.keep_monthly
        );
        if dry_run {
            println!("🔍 DRY RUN: nothing will be deleted");
        }
    }

    let artifacts = scan_backups(app_config)?;
    let plan = retention::plan(&artifacts, &policy, Local::now().naive_local());
    let report = retention::execute(&plan, dry_run);

    if json {
        let output = serde_json::json!({ "plan": plan, "execution": report });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_retention(&plan, &report);
    }

    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_retention(plan: &RetentionPlan, report: &ExecutionReport) {
    for entry in plan.kept() {
        println!("  ✅ keep    {:<8} {}", entry.tier.to_string(), entry.path.display());
    }
    let verb = if report.dry_run { "would delete" } else { "deleted" };
    for path in &report.deleted_files {
        println!("  🗑️ {} {}", verb, path.display());
    }
    for failure in &report.failures {
        println!("  ❌ {}", failure.reason);
    }
    if !plan.unclassified.is_empty() {
        println!("⚠️ {} file(s) do not follow the naming contract and were left alone:", plan.unclassified.len());
        for path in &plan.unclassified {
            println!("    {}", path.display());
        }
    }
    println!(
        "📊 Checked: {}, kept: {}, {}: {}, failed: {}, space freed: {}",
        report.files_checked,
        report.files_kept,
        verb,
        report.files_deleted,
        report.failures.len(),
        format_size(report.space_freed_bytes)
    );
}

async fn run_verify(app_config: &AppConfig, file: &Path, engine: Option<String>, json: bool) -> Result<ExitCode> {
    let engine = resolve_engine(file, engine)?;
    if !json {
        println!("🔍 Verifying {} ({})...", file.display(), engine);
    }

    let report = verify::verify(file, &engine, &app_config.verification).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &VerificationReport) {
    for (name, outcome) in &report.checks {
        let mark = if outcome.passed { "✅" } else { "❌" };
        println!("  {} {}: {}", mark, name, outcome.message);
    }
    if let Some(checksum) = &report.checksum {
        println!("  🔑 SHA-256: {}", checksum);
    }
    let mark = if report.passed() { "✅" } else { "❌" };
    println!("{} {}", mark, report.summary);
}

fn run_verify_history(app_config: &AppConfig, backup_file: Option<&Path>) -> Result<ExitCode> {
    let log_dir = &app_config.verification.log_dir;
    let reports = verify::history(log_dir, backup_file)
        .with_context(|| format!("Failed to read verification history from {}", log_dir.display()))?;

    if reports.is_empty() {
        println!("ℹ️ No verification reports found in {}", log_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for report in &reports {
        let mark = if report.passed() { "✅" } else { "❌" };
        println!(
            "{} {}  {}  {}",
            mark,
            report.timestamp_checked.format("%Y-%m-%d %H:%M:%S"),
            report.artifact_path.display(),
            report.summary
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_stats(app_config: &AppConfig) -> Result<ExitCode> {
    let artifacts = scan_backups(app_config)?;
    let stats = retention::collect_stats(&artifacts, Local::now().naive_local());

    println!("📊 Backup statistics for {}", app_config.backup_dir.display());
    println!("  Total backups: {}", stats.total_backups);
    println!("  Total size: {}", format_size(stats.total_size_bytes));
    for (group, count) in &stats.per_group {
        println!("  {}: {}", group, count);
    }
    if stats.unclassified > 0 {
        println!("  Unclassified: {}", stats.unclassified);
    }
    println!("  Last day: {}", stats.by_age.last_day);
    println!("  Last week: {}", stats.by_age.last_week);
    println!("  Last month: {}", stats.by_age.last_month);
    println!("  Older: {}", stats.by_age.older);
    if stats.by_age.undated > 0 {
        println!("  Undated: {}", stats.by_age.undated);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_list_tables(app_config: &AppConfig, file: &Path, engine: Option<String>) -> Result<ExitCode> {
    let engine = resolve_engine(file, engine)?;
    let listing = FormatChecker::for_engine(Engine::from_token(&engine))
        .list(file, &app_config.verification)
        .await
        .with_context(|| format!("Failed to list the contents of {}", file.display()))?;

    println!("📋 {} {} in {}:", listing.units.len(), listing.unit, file.display());
    for unit in &listing.units {
        println!("  - {}", unit);
    }
    if let Some(warning) = &listing.warning {
        println!("⚠️ {}", warning);
    }
    Ok(ExitCode::SUCCESS)
}
