use std::io::BufReader;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::{self, AppConfig, DestinationTarget, MigrationOptions, RunConfig};
use crate::mapping::columns::Resolution;
use crate::mapping::prompt::LinePrompter;
use crate::migrate::{Orchestrator, RunReport};
use crate::providers;
use crate::state::store::{RunStateStore, UserMappingStore};
use crate::state::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Run { config: RunConfig, json: bool },
    Resume {
        run_id: Option<String>,
        retry: bool,
        json: bool,
    },
    Runs,
    Help,
}

#[derive(Debug, PartialEq)]
pub struct Cli {
    pub command: Command,
    pub verbosity: u8,
    pub log_format: LogFormat,
}

/// Split global flags from the subcommand and its arguments.
pub fn parse_args(args: &[String]) -> Result<Cli> {
    let mut verbosity = 0;
    let mut log_format = LogFormat::Text;
    let mut rest: Vec<String> = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => verbosity += 1,
            "-vv" => verbosity += 2,
            "--log-format" => {
                i += 1;
                log_format = match args.get(i).map(String::as_str) {
                    Some("text") => LogFormat::Text,
                    Some("json") => LogFormat::Json,
                    Some(other) => bail!("Unknown log format '{other}' (expected text or json)"),
                    None => bail!("Missing value for --log-format"),
                };
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match rest.first().map(String::as_str) {
        None | Some("help" | "-h" | "--help") => Command::Help,
        Some("run") => parse_run_args(&rest[1..])?,
        Some("resume") => parse_resume_args(&rest[1..])?,
        Some("runs") => Command::Runs,
        Some(other) => bail!("Unknown command '{other}'. Run `board-migrate help` for usage."),
    };

    Ok(Cli {
        command,
        verbosity,
        log_format,
    })
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("Missing value for {flag}"))
}

/// Parse `board-migrate run` arguments.
///
/// Supported forms:
///   board-migrate run --project 1 --table 2 --board 3
///   board-migrate run --project 1 --table 2 --new-board "Imported" --comments --dry-run
pub fn parse_run_args(args: &[String]) -> Result<Command> {
    let mut project_id = None;
    let mut card_table_id = None;
    let mut destination = None;
    let mut options = MigrationOptions::default();
    let mut json = false;
    let mut i = 0;

    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--project" => {
                i += 1;
                project_id = Some(value(args, i, flag)?.to_string());
            }
            "--table" => {
                i += 1;
                card_table_id = Some(value(args, i, flag)?.to_string());
            }
            "--board" | "--new-board" => {
                if destination.is_some() {
                    bail!("Use only one of --board and --new-board");
                }
                i += 1;
                let v = value(args, i, flag)?.to_string();
                destination = Some(if flag == "--board" {
                    DestinationTarget::Existing(v)
                } else {
                    DestinationTarget::CreateNew(v)
                });
            }
            "--batch-size" => {
                i += 1;
                let raw = value(args, i, flag)?;
                options.batch_size = match raw.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => bail!("--batch-size must be a positive number, got '{raw}'"),
                };
            }
            "--comments" => options.migrate_comments = true,
            "--update-existing" => options.update_existing = true,
            "--dry-run" => options.dry_run = true,
            "--skip-users" => options.skip_user_mapping = true,
            "-i" | "--interactive" => options.interactive = true,
            "--json" => json = true,
            other => bail!("Unknown option '{other}' for run"),
        }
        i += 1;
    }

    let config = RunConfig {
        project_id: project_id.context("Missing --project <id>")?,
        card_table_id: card_table_id.context("Missing --table <id>")?,
        destination: destination.context("Missing --board <id> or --new-board <name>")?,
        options,
    };
    Ok(Command::Run { config, json })
}

pub fn parse_resume_args(args: &[String]) -> Result<Command> {
    let mut run_id = None;
    let mut retry = false;
    let mut json = false;

    for arg in args {
        match arg.as_str() {
            "--retry" => retry = true,
            "--json" => json = true,
            other if other.starts_with('-') => bail!("Unknown option '{other}' for resume"),
            other => {
                if run_id.is_some() {
                    bail!("resume takes at most one run id");
                }
                run_id = Some(other.to_string());
            }
        }
    }

    Ok(Command::Resume {
        run_id,
        retry,
        json,
    })
}

pub async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Runs => list_runs(),
        Command::Run { config, json } => handle_run(config, json).await,
        Command::Resume {
            run_id,
            retry,
            json,
        } => handle_resume(run_id, retry, json).await,
    }
}

fn build_orchestrator(app: &AppConfig, interactive: bool) -> Result<Orchestrator> {
    let (source, destination) = providers::create_providers(app)?;
    let orchestrator = Orchestrator::new(
        Arc::new(source),
        Arc::new(destination),
        RunStateStore::new(app.migration.state_dir()),
        UserMappingStore::new(config::data_dir().join("user-mappings.json")),
    );
    if interactive {
        let prompter = LinePrompter::new(BufReader::new(std::io::stdin()), std::io::stdout());
        return Ok(orchestrator.with_prompter(Box::new(prompter)));
    }
    Ok(orchestrator)
}

async fn handle_run(run: RunConfig, json: bool) -> Result<()> {
    let app = config::load_config()?;
    let orchestrator = build_orchestrator(&app, run.options.interactive)?;
    let report = orchestrator.run(&run).await?;
    print_report(&report, json)
}

async fn handle_resume(run_id: Option<String>, retry: bool, json: bool) -> Result<()> {
    let app = config::load_config()?;
    let orchestrator = build_orchestrator(&app, false)?;
    let run_id = match run_id {
        Some(id) => id,
        None => orchestrator
            .store()
            .latest()?
            .context("No stored runs to resume")?,
    };

    let report = if retry {
        orchestrator.retry_failed(&run_id).await?
    } else {
        orchestrator.resume(&run_id)?
    };
    print_report(&report, json)
}

fn list_runs() -> Result<()> {
    let app = config::load_config()?;
    let store = RunStateStore::new(app.migration.state_dir());
    let ids = store.list()?;
    if ids.is_empty() {
        println!("No runs in {}", store.dir().display());
        return Ok(());
    }
    for id in ids {
        match store.load(&id) {
            Ok(state) => println!(
                "{id}  {:<11}  {}/{} successful  {} -> {}",
                state.status.to_string(),
                state.progress.successful,
                state.progress.total,
                state.source.board_title,
                state.destination.board_name
            ),
            Err(e) => println!("{id}  unreadable: {e}"),
        }
    }
    Ok(())
}

fn resolution_label(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Builtin => "built-in",
        Resolution::Matched => "matched",
        Resolution::Created => "created",
        Resolution::Placeholder => "would create",
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let dry = if report.dry_run { " (dry run)" } else { "" };
    println!("Run {}: {}{dry}", report.run_id, report.status);
    println!(
        "  Source:       {} / {} ({})",
        report.source.project_name, report.source.board_title, report.source.system
    );
    println!(
        "  Destination:  {} ({}, board {}{})",
        report.destination.board_name,
        report.destination.system,
        report.destination.board_id,
        if report.destination.created { ", new" } else { "" }
    );
    let p = &report.progress;
    println!(
        "  Cards:        {} total, {} processed, {} successful, {} failed, {} skipped",
        p.total, p.processed, p.successful, p.failed, p.skipped
    );
    let m = &report.metadata;
    println!(
        "  Created:      {} columns, {} steps, {} comments; {} users mapped",
        m.columns_created, m.steps_migrated, m.comments_migrated, m.users_mapped
    );
    println!("  Warnings:     {}", report.warnings);
    println!("  Duration:     {}s", report.duration_secs);

    if !report.columns.is_empty() {
        println!();
        println!("COLUMNS:");
        for column in &report.columns {
            println!(
                "  {:<24} {:<8} {:<30} {} cards, {}",
                column.source_title,
                column.workflow_type.to_string(),
                column.action.to_string(),
                column.record_count,
                resolution_label(column.resolution)
            );
        }
    }

    if !report.open_failures.is_empty() {
        println!();
        println!("FAILED:");
        for item in &report.open_failures {
            println!("  {:?} {} \"{}\": {}", item.kind, item.source_id, item.title, item.error);
        }
    }

    if report.status == RunStatus::Partial {
        println!();
        println!(
            "Retry the failed items with: board-migrate resume {} --retry",
            report.run_id
        );
    }
    Ok(())
}

pub fn print_help() {
    println!("board-migrate: move a Basecamp card table onto a Fizzy board\n");
    println!("USAGE:");
    println!("  board-migrate run [OPTIONS]          Start a new migration run");
    println!("  board-migrate resume [RUN] [--retry] Show a stored run, or retry its failures");
    println!("  board-migrate runs                   List stored runs, newest first");
    println!();
    println!("RUN OPTIONS:");
    println!("  --project <id>        Basecamp project id");
    println!("  --table <id>          Card table id inside the project");
    println!("  --board <id>          Migrate into an existing Fizzy board");
    println!("  --new-board <name>    Create a new Fizzy board");
    println!("  --comments            Migrate comments too");
    println!("  --update-existing     Update cards migrated by an earlier run");
    println!("  --dry-run             Make no changes on Fizzy");
    println!("  --skip-users          Skip user mapping, reuse earlier mappings");
    println!("  --batch-size <n>      Cards per checkpoint (default 10)");
    println!("  -i, --interactive     Confirm user matches at the terminal");
    println!("  --json                Print the run report as JSON");
    println!();
    println!("GLOBAL OPTIONS:");
    println!("  -v, --verbose         More logging (repeat for trace)");
    println!("  --log-format <fmt>    text (default) or json");
    println!();
    println!("Credentials are read from ~/.board-migrate/config.toml");
}
