/*!
 * Convoy - chunked parallel replication driver
 *
 * Command-line entry point: profile runs (one, several, or all enabled),
 * dry-run planning, snapshot maintenance, and health inspection. The
 * orchestration itself lives in the library; this file is argument
 * parsing, wiring, and table rendering.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::{Arg, ArgAction, Command};
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use convoy::config::AppConfig;
use convoy::core::health;
use convoy::logging::init_logging;
use convoy::notify::LogNotifier;
use convoy::snapshot::{CommandVssDriver, SnapshotDriver, TrackedShadow, TrackingRegistry};
use convoy::stats::RunSummary;
use convoy::system::SystemClock;
use convoy::{RobocopyEngine, Session};

fn main() {
    let code = match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

fn cli() -> Command {
    Command::new("convoy")
        .version(convoy::VERSION)
        .about("Chunked parallel file replication driven by a robocopy-style copier")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML configuration file")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Replicate one or more named profiles")
                .arg(
                    Arg::new("profile")
                        .short('p')
                        .long("profile")
                        .value_name("NAME")
                        .action(ArgAction::Append)
                        .required(true)
                        .help("Profile to run (repeatable)"),
                ),
        )
        .subcommand(Command::new("run-all").about("Replicate every enabled profile"))
        .subcommand(
            Command::new("plan")
                .about("Scan and chunk a profile without copying anything")
                .arg(
                    Arg::new("profile")
                        .short('p')
                        .long("profile")
                        .value_name("NAME")
                        .required(true)
                        .help("Profile to plan"),
                ),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Inspect and maintain volume snapshots")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List shadows and their tracking state"))
                .subcommand(
                    Command::new("create")
                        .about("Create and track a shadow of a volume")
                        .arg(Arg::new("volume").required(true).help("Volume, e.g. C:\\")),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete a shadow by id")
                        .arg(Arg::new("shadow-id").required(true)),
                )
                .subcommand(
                    Command::new("prune")
                        .about("Apply the retention policy to a volume")
                        .arg(Arg::new("volume").required(true))
                        .arg(
                            Arg::new("keep")
                                .long("keep")
                                .value_name("COUNT")
                                .help("Shadows to keep (defaults to the configured keep_count)"),
                        ),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Read the health status file")
                .arg(
                    Arg::new("max-age")
                        .long("max-age")
                        .value_name("SECONDS")
                        .default_value("60")
                        .help("Age beyond which the status is reported stale"),
                ),
        )
}

fn run_cli() -> Result<i32> {
    let matches = cli().get_matches();

    let config = load_config(matches.get_one::<String>("config"))?;
    let verbose = matches.get_flag("verbose");

    match matches.subcommand() {
        Some(("run", sub)) => {
            let names: Vec<String> = sub
                .get_many::<String>("profile")
                .expect("required")
                .cloned()
                .collect();
            run_profiles(config, Some(names), verbose)
        }
        Some(("run-all", _)) => run_profiles(config, None, verbose),
        Some(("plan", sub)) => {
            init_logging(config.log_level, verbose, None)?;
            let name = sub.get_one::<String>("profile").expect("required");
            plan_profile(config, name)
        }
        Some(("snapshot", sub)) => {
            init_logging(config.log_level, verbose, None)?;
            snapshot_command(config, sub)
        }
        Some(("status", sub)) => {
            let max_age: i64 = sub
                .get_one::<String>("max-age")
                .expect("defaulted")
                .parse()
                .context("--max-age must be a number of seconds")?;
            status_command(config, max_age)
        }
        _ => unreachable!("subcommand required"),
    }
}

fn load_config(path: Option<&String>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            AppConfig::load(Path::new(path)).with_context(|| format!("loading {}", path))
        }
        None => {
            let default = PathBuf::from("convoy.toml");
            if default.exists() {
                AppConfig::load(&default).context("loading convoy.toml")
            } else {
                Ok(AppConfig::default())
            }
        }
    }
}

fn make_session(config: AppConfig) -> Session {
    let engine = Arc::new(RobocopyEngine::new(config.copier_executable.clone()));
    Session::new(
        config,
        engine,
        Arc::new(CommandVssDriver::new()),
        Box::new(LogNotifier),
        Arc::new(SystemClock),
    )
}

fn run_profiles(config: AppConfig, names: Option<Vec<String>>, verbose: bool) -> Result<i32> {
    let session = make_session(config.clone());

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let log_path = config
        .logs_dir(&date)
        .join(format!("session_{}.log", session.session_id()));
    init_logging(config.log_level, verbose, Some(&log_path))?;

    // Ctrl-C stops the run in an orderly fashion
    let cancel = session.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("stop requested; draining active chunks...");
        cancel.cancel();
    })
    .context("installing signal handler")?;

    let summary = session.run(names.as_deref())?;
    print_summary(&summary);
    Ok(summary.exit_code())
}

fn plan_profile(config: AppConfig, name: &str) -> Result<i32> {
    let session = make_session(config);
    let chunks = session.plan(name)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Chunk", "Source", "Mode", "Size", "Files", "Depth",
    ]);
    for chunk in &chunks {
        table.add_row(vec![
            Cell::new(chunk.id),
            Cell::new(&chunk.source),
            Cell::new(if chunk.files_only { "files-only" } else { "tree" }),
            Cell::new(ByteSize::b(chunk.estimated_size)),
            Cell::new(chunk.estimated_files),
            Cell::new(chunk.depth),
        ]);
    }
    println!("{table}");

    let total_bytes: u64 = chunks.iter().map(|c| c.estimated_size).sum();
    let total_files: u64 = chunks.iter().map(|c| c.estimated_files).sum();
    println!(
        "{} chunks, {} across {} files",
        chunks.len(),
        ByteSize::b(total_bytes),
        total_files
    );
    Ok(0)
}

fn snapshot_command(config: AppConfig, matches: &clap::ArgMatches) -> Result<i32> {
    let driver = CommandVssDriver::new();
    let registry = TrackingRegistry::new(
        config.tracking_path(),
        std::time::Duration::from_secs(config.snapshot.lock_timeout_secs),
    );

    match matches.subcommand() {
        Some(("list", _)) => {
            let shadows = driver.list_shadows(None)?;
            let tracked = registry.all()?;

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Shadow ID", "Volume", "Created", "Tracked"]);
            for shadow in &shadows {
                let is_tracked = tracked
                    .iter()
                    .any(|t| t.shadow_id.eq_ignore_ascii_case(&shadow.shadow_id));
                table.add_row(vec![
                    Cell::new(&shadow.shadow_id),
                    Cell::new(&shadow.volume),
                    Cell::new(shadow.created_at.to_rfc3339()),
                    Cell::new(if is_tracked { "yes" } else { "no" }),
                ]);
            }
            println!("{table}");
            Ok(0)
        }
        Some(("create", sub)) => {
            let volume = sub.get_one::<String>("volume").expect("required");
            let info = driver.create_shadow(volume, None)?;
            registry.register(TrackedShadow {
                shadow_id: info.shadow_id.clone(),
                source_volume: info.volume.clone(),
                created_at: info.created_at,
                server_name: None,
                is_remote: false,
            })?;
            println!("created {} at {}", info.shadow_id, info.shadow_path);
            Ok(0)
        }
        Some(("delete", sub)) => {
            let shadow_id = sub.get_one::<String>("shadow-id").expect("required");
            driver.delete_shadow(shadow_id, None)?;
            registry.unregister(shadow_id)?;
            println!("deleted {}", shadow_id);
            Ok(0)
        }
        Some(("prune", sub)) => {
            let volume = sub.get_one::<String>("volume").expect("required");
            let keep = match sub.get_one::<String>("keep") {
                Some(raw) => raw.parse::<u32>().context("--keep must be a count")?,
                None => config.snapshot.keep_count.ok_or_else(|| {
                    anyhow::anyhow!("no --keep given and no keep_count configured")
                })?,
            };
            let session = make_session(config);
            let report = session.snapshot_manager().prune(volume, keep)?;
            println!(
                "deleted {} shadows, kept {}, {} external untouched",
                report.deleted.len(),
                report.kept,
                report.external
            );
            Ok(0)
        }
        _ => unreachable!("subcommand required"),
    }
}

fn status_command(config: AppConfig, max_age: i64) -> Result<i32> {
    let clock: convoy::system::SharedClock = Arc::new(SystemClock);
    let status = health::read_status(&config.health_path(), max_age, &clock)?;

    println!("phase:     {}", status.phase);
    if let Some(profile) = &status.current_profile {
        println!(
            "profile:   {} ({}/{})",
            profile,
            status.profile_index + 1,
            status.profile_count
        );
    }
    println!(
        "chunks:    {}/{} done, {} pending, {} failed, {} active",
        status.chunks_completed,
        status.chunks_total,
        status.chunks_pending,
        status.chunks_failed,
        status.active_jobs
    );
    println!("bytes:     {}", ByteSize::b(status.bytes_completed));
    match status.eta_seconds {
        Some(secs) if status.eta_capped => println!("eta:       > {} s (capped)", secs),
        Some(secs) => println!("eta:       {} s", secs),
        None => println!("eta:       unknown"),
    }
    println!(
        "healthy:   {}{}",
        status.healthy,
        if status.is_stale { " (stale)" } else { "" }
    );
    if let Some(message) = &status.message {
        println!("message:   {}", message);
    }
    Ok(if status.healthy { 0 } else { 1 })
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Profile", "Status", "Chunks", "Resumed", "Failed", "Bytes", "Files", "Duration",
    ]);
    for result in &summary.results {
        table.add_row(vec![
            Cell::new(&result.name),
            Cell::new(result.status),
            Cell::new(format!("{}/{}", result.completed, result.total_chunks)),
            Cell::new(result.resumed),
            Cell::new(result.failed),
            Cell::new(ByteSize::b(result.bytes_copied)),
            Cell::new(result.files_copied),
            Cell::new(format!("{:.1}s", result.duration_ms() as f64 / 1000.0)),
        ]);
    }
    println!("{table}");
    println!(
        "session {}: {} in {:.1}s ({}/s)",
        summary.session_id,
        summary.status(),
        summary.duration_ms() as f64 / 1000.0,
        ByteSize::b(summary.throughput_bps() as u64)
    );
}
