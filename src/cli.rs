//! Command-line front end.
//!
//! Exit codes: 0 ok, 1 the run finished with failures, 2 setup or
//! configuration error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::config::{SETTINGS_ENV, Settings, default_data_dir, default_settings_path};
use crate::sources::interactive::{InteractiveError, confirm_with_details, describe_plan};
use crate::sources::rclone::parse_remote_list;
use crate::sources::{
    CommandRunner, FileSink, SyncOrchestrator, SyncRunReport, SyncStatus, TracingSink,
    TranscriptSink,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_SETUP: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "cloudmirror",
    version,
    about = "Mirror cloud remotes into one destination bucket with rclone"
)]
pub struct Cli {
    /// Settings file
    #[arg(long, global = true, env = SETTINGS_ENV, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Directory for sync status
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Dry run: show what would be purged and mirrored
    Test(RunArgs),
    /// Purge orphan folders and mirror every source for real
    Execute(ExecuteArgs),
    /// Compare configured sources with the remotes in the rclone config
    Remotes(OutputArgs),
    /// Show the outcome of the last real sync per source
    Status(OutputArgs),
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

/// Prints transcript lines as they arrive.
struct StdoutSink;

impl TranscriptSink for StdoutSink {
    fn line(&self, line: &str) {
        println!("{line}");
    }
}

/// Parse arguments and run; returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            EXIT_SETUP
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = Settings::load(&settings_path)?;
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    match cli.command {
        Command::Test(args) => run_sync(&settings, &data_dir, false, args.output.json, true).await,
        Command::Execute(args) => {
            run_sync(&settings, &data_dir, true, args.output.json, args.yes).await
        }
        Command::Remotes(args) => run_remotes(&settings, args.json).await,
        Command::Status(args) => run_status(&settings, &data_dir, args.json),
    }
}

async fn run_sync(
    settings: &Settings,
    data_dir: &std::path::Path,
    execute: bool,
    json: bool,
    confirmed: bool,
) -> Result<i32> {
    let options = settings.run_options(execute)?;

    if execute && !confirmed {
        let details = describe_plan(&options);
        match confirm_with_details("A real sync will modify the destination:", &details, false) {
            Ok(true) => {}
            Ok(false) => return Err(InteractiveError::Cancelled.into()),
            Err(e) => return Err(e.into()),
        }
    }

    // With --json, stdout is reserved for the report.
    let live: Arc<dyn TranscriptSink> = if json {
        Arc::new(TracingSink)
    } else {
        Arc::new(StdoutSink)
    };
    let mut orchestrator = SyncOrchestrator::new(settings.runner()).with_sink(live);
    if let Some(log_file) = &settings.log_file {
        let sink = FileSink::open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;
        orchestrator = orchestrator.with_sink(Arc::new(sink));
    }

    let cancel = orchestrator.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current step");
            cancel.cancel();
        }
    });

    let report = if execute {
        orchestrator.execute_sync(options).await
    } else {
        orchestrator.test_sync(options).await
    };
    interrupt.abort();

    if execute {
        record_status(data_dir, &report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &SyncRunReport) -> i32 {
    if report.success {
        EXIT_OK
    } else if report.error.is_some() {
        EXIT_SETUP
    } else {
        EXIT_FAILED
    }
}

fn record_status(data_dir: &std::path::Path, report: &SyncRunReport) {
    let result = SyncStatus::load(data_dir).and_then(|mut status| {
        status.record_run(report);
        status.save(data_dir)
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, dir = %data_dir.display(), "failed to save sync status");
    }
}

fn print_summary(report: &SyncRunReport) {
    println!();
    if report.success {
        println!("{} {}", "✓".green(), report.message.green());
    } else {
        println!("{} {}", "✗".red(), report.message.red());
        for failed in report.failed_sources() {
            println!(
                "    {} {}",
                failed.source.bold(),
                failed.error.as_deref().unwrap_or("failed").dimmed()
            );
        }
    }
}

async fn run_remotes(settings: &Settings, json: bool) -> Result<i32> {
    let options = settings.run_options(false)?;
    let command = options.rclone().list_remotes();
    let output = settings
        .runner()
        .run(&command)
        .await
        .with_context(|| format!("failed to list remotes: {command}"))?;
    let available = parse_remote_list(&output.stdout);

    let missing: Vec<&str> = options
        .sources
        .iter()
        .map(|s| s.name.as_str())
        .chain(std::iter::once(options.destination_remote.as_str()))
        .filter(|name| !available.iter().any(|a| a == name))
        .collect();
    let unused: Vec<&str> = available
        .iter()
        .map(String::as_str)
        .filter(|a| *a != options.destination_remote)
        .filter(|a| !options.sources.iter().any(|s| s.name == *a))
        .collect();

    if json {
        let value = serde_json::json!({
            "available": available,
            "missing": missing,
            "unconfigured": unused,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for source in &options.sources {
            let mark = if missing.contains(&source.name.as_str()) {
                "✗".red()
            } else {
                "✓".green()
            };
            println!("{mark} {} ({})", source.name.bold(), source.kind);
        }
        let dest_mark = if missing.contains(&options.destination_remote.as_str()) {
            "✗".red()
        } else {
            "✓".green()
        };
        println!("{dest_mark} {} (destination)", options.destination_remote.bold());
        for name in &unused {
            println!("  {} {}", name.dimmed(), "(in rclone config, not configured)".dimmed());
        }
    }

    Ok(if missing.is_empty() { EXIT_OK } else { EXIT_FAILED })
}

fn run_status(settings: &Settings, data_dir: &std::path::Path, json: bool) -> Result<i32> {
    let status = SyncStatus::load(data_dir)
        .with_context(|| format!("failed to read sync status in {}", data_dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(EXIT_OK);
    }

    for source in &settings.sources {
        let line = match status.get(&source.name) {
            None => "never synced".dimmed().to_string(),
            Some(info) => {
                let when = info
                    .last_sync
                    .and_then(chrono::DateTime::from_timestamp_millis)
                    .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                match &info.last_result {
                    crate::sources::SyncResult::Success => format!("{} {when}", "ok".green()),
                    crate::sources::SyncResult::Failed(e) => {
                        format!("{} {when}: {}", "failed".red(), e.dimmed())
                    }
                    crate::sources::SyncResult::Skipped => "skipped".yellow().to_string(),
                }
            }
        };
        println!("{} {line}", source.name.bold());
    }
    if !status.last_purged.is_empty() {
        println!("last purged: {}", status.last_purged.join(", "));
    }
    Ok(EXIT_OK)
}
