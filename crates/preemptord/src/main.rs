//! preemptord: the preemption scheduler binary.
//!
//! Loads a cluster scenario into a state store and drives it with the
//! scheduler:
//! - `simulate` runs a fixed number of passes and prints each report
//! - `serve` keeps the scheduling loop running until Ctrl-C
//! - `check-config` validates a scheduler config file
//!
//! # Usage
//!
//! ```text
//! preemptord simulate --scenario scenarios/basic.toml --passes 3 --complete-terminations
//! preemptord serve --scenario scenarios/basic.toml --data-dir /var/lib/preemptor
//! preemptord check-config preemptor.toml
//! ```

mod scenario;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use preemptor_core::SchedulerConfig;
use preemptor_scheduler::{PassReport, ScheduleOutcome, Scheduler};
use preemptor_state::StateStore;

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "preemptord", about = "Priority preemption scheduler")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run scheduling passes over a scenario and print the outcomes.
    Simulate {
        /// Scenario file (TOML).
        #[arg(long)]
        scenario: PathBuf,

        /// Scheduler config file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of passes to run.
        #[arg(long, default_value = "3")]
        passes: u32,

        /// Let every terminating workload finish between passes.
        #[arg(long)]
        complete_terminations: bool,

        /// Print reports as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Keep the scheduling loop running until Ctrl-C.
    Serve {
        /// Scenario file (TOML) to seed the store with.
        #[arg(long)]
        scenario: Option<PathBuf>,

        /// Scheduler config file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state. In-memory when absent.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Validate a scheduler config file and print it normalized.
    CheckConfig {
        /// Config file to check.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Simulate {
            scenario,
            config,
            passes,
            complete_terminations,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let store = StateStore::open_in_memory()?;
            Scenario::from_file(&scenario)?.load_into(&store)?;
            let scheduler = build_scheduler(store, &config)?;

            let reports = simulate(&scheduler, passes, complete_terminations)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for (i, report) in reports.iter().enumerate() {
                    print_report(i + 1, report);
                }
            }
            Ok(())
        }
        Command::Serve {
            scenario,
            config,
            data_dir,
        } => serve(scenario, config, data_dir).await,
        Command::CheckConfig { file } => {
            let config = SchedulerConfig::from_file(&file)?;
            let registry = config.priority_registry()?;
            info!(
                classes = registry.iter().count(),
                preemption = config.scheduler.enable_preemption,
                "config is valid"
            );
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,preemptor=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)?;
            info!(path = ?path, "config loaded");
            Ok(config)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

/// Register the config's priority classes in the store, then resolve
/// against everything the store knows.
fn build_scheduler(
    store: StateStore,
    config: &SchedulerConfig,
) -> anyhow::Result<Scheduler<StateStore>> {
    for class in config.priority_registry()?.iter() {
        store.put_priority_class(class)?;
    }
    let registry = store.priority_registry()?;
    Ok(Scheduler::new(store, registry, config.scheduler.clone()))
}

fn simulate(
    scheduler: &Scheduler<StateStore>,
    passes: u32,
    complete_terminations: bool,
) -> anyhow::Result<Vec<PassReport>> {
    let mut reports = Vec::new();
    for pass in 1..=passes {
        let report = scheduler.schedule_pass()?;
        if complete_terminations {
            let finished = scheduler.cluster().complete_all_terminations()?;
            info!(pass, finished, "terminations completed");
        }
        reports.push(report);
    }
    Ok(reports)
}

fn print_report(pass: usize, report: &PassReport) {
    println!("pass {pass}:");
    if report.records.is_empty() {
        println!("  nothing pending");
    }
    for record in &report.records {
        match &record.outcome {
            ScheduleOutcome::Bound { node } => println!("  {} bound to {node}", record.workload),
            ScheduleOutcome::Nominated { node, victims } => {
                let victims: Vec<String> = victims.iter().map(ToString::to_string).collect();
                println!(
                    "  {} nominated {node}, evicting {}",
                    record.workload,
                    victims.join(", ")
                );
            }
            ScheduleOutcome::Waiting { node } => {
                println!("  {} waiting for {node} to drain", record.workload)
            }
            ScheduleOutcome::Unschedulable { reason } => {
                println!("  {} unschedulable: {reason}", record.workload)
            }
            ScheduleOutcome::Deferred { reason, .. } => {
                println!("  {} deferred: {reason}", record.workload)
            }
        }
    }
}

async fn serve(
    scenario: Option<PathBuf>,
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(config.as_deref())?;

    let store = match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let db_path = dir.join("preemptor.redb");
            let store = StateStore::open(&db_path)?;
            info!(path = ?db_path, "state store opened");
            store
        }
        None => StateStore::open_in_memory()?,
    };
    if let Some(path) = scenario {
        Scenario::from_file(&path)?.load_into(&store)?;
        info!(path = ?path, "scenario loaded");
    }

    let scheduler = build_scheduler(store, &config)?;
    let interval = scheduler.settings().pass_interval();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(interval, shutdown_rx).await;
    info!("preemptord stopped");
    Ok(())
}
