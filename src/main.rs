//! # Tentacle — periodic task scheduler
//!
//! One binary, three roles:
//!   tentacle scheduler          # run the tick loop (one active per role)
//!   tentacle worker             # run the consuming worker pool
//!   tentacle task add|list|...  # manage schedule entries in the store

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tentacle_broker::{Broker, MemBroker, SqliteBroker};
use tentacle_core::{ActionRef, TentacleConfig};
use tentacle_scheduler::entry::{self, Cadence, Crontab, Period, ScheduleEntry};
use tentacle_scheduler::{build_ticker, run_ticker};
use tentacle_store::{MemStore, SqliteStore, Store};
use tentacle_worker::{ActionRegistry, WorkerPool};

#[derive(Parser)]
#[command(
    name = "tentacle",
    version,
    about = "⏰ Tentacle — periodic task scheduler"
)]
struct Cli {
    /// Config file path (default: ~/.tentacle/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// In-memory store and broker; state dies with the process
    #[arg(long)]
    ephemeral: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler tick loop
    Scheduler {
        /// Seconds between ticks
        #[arg(long)]
        tick_secs: Option<u64>,
        /// Logical scheduler role (replicas sharing a role elect one leader)
        #[arg(long)]
        role: Option<String>,
        /// Ticker implementation ("core" or "noop")
        #[arg(long)]
        ticker: Option<String>,
    },
    /// Run the worker pool
    Worker {
        /// Number of concurrent consumers
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Manage schedule entries
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a schedule entry
    Add {
        /// Unique entry name
        name: String,
        /// Interval count, used with --period
        #[arg(long, conflicts_with = "cron")]
        every: Option<u64>,
        /// days | hours | minutes | seconds | microseconds
        #[arg(long, requires = "every")]
        period: Option<String>,
        /// 5-field cron expression: "MIN HOUR DOM MON DOW"
        #[arg(long)]
        cron: Option<String>,
        /// Action executed by workers ("log", "webhook")
        #[arg(long, default_value = "log")]
        action: String,
        /// JSON argument blob passed to the action
        #[arg(long, default_value = "{}")]
        args: String,
        /// Publish to this queue instead of the configured default
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List schedule entries
    List,
    /// Remove an entry
    Remove { name: String },
    /// Enable an entry
    Enable { name: String },
    /// Disable an entry (it keeps its next-due time but never dispatches)
    Disable { name: String },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "tentacle".into());
    format!("{host}-{}", std::process::id())
}

fn open_backends(
    config: &TentacleConfig,
    ephemeral: bool,
) -> Result<(Arc<dyn Store>, Arc<dyn Broker>)> {
    let redelivery = Duration::from_secs(config.broker.redelivery_secs);
    if ephemeral {
        tracing::warn!("ephemeral mode: schedule state will not survive this process");
        return Ok((
            Arc::new(MemStore::new()),
            Arc::new(MemBroker::new(redelivery)),
        ));
    }
    let store_path = expand_path(&config.store.path);
    let broker_path = expand_path(&config.broker.path);
    let store = SqliteStore::open(Path::new(&store_path))?;
    let broker = SqliteBroker::open(Path::new(&broker_path), redelivery)?;
    Ok((Arc::new(store), Arc::new(broker)))
}

/// Flip the shutdown flag on ctrl-c.
fn watch_for_shutdown() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tentacle=debug,tentacle_core=debug,tentacle_store=debug,tentacle_broker=debug,\
         tentacle_scheduler=debug,tentacle_worker=debug"
    } else {
        "tentacle=info,tentacle_scheduler=info,tentacle_worker=info,tentacle_broker=info,\
         tentacle_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TentacleConfig::load_from(Path::new(&expand_path(path)))?,
        None => TentacleConfig::load()?,
    };

    match cli.command {
        Command::Scheduler {
            tick_secs,
            role,
            ticker,
        } => {
            if let Some(tick_secs) = tick_secs {
                config.scheduler.tick_secs = tick_secs;
            }
            if let Some(role) = role {
                config.scheduler.role = role;
            }
            if let Some(ticker) = ticker {
                config.scheduler.ticker = ticker;
            }

            let (store, broker) = open_backends(&config, cli.ephemeral)?;
            let instance = instance_id();
            tracing::info!(
                "instance '{instance}' competing for role '{}'",
                config.scheduler.role
            );
            let ticker = build_ticker(
                &config.scheduler,
                &config.broker,
                store,
                broker,
                &instance,
            )?;
            run_ticker(ticker, config.scheduler.tick_secs, watch_for_shutdown()).await?;
        }

        Command::Worker { concurrency } => {
            if let Some(concurrency) = concurrency {
                config.worker.concurrency = concurrency;
            }
            let (store, broker) = open_backends(&config, cli.ephemeral)?;
            let registry = Arc::new(ActionRegistry::new(Duration::from_secs(
                config.worker.action_timeout_secs,
            )));
            let pool = WorkerPool::new(
                store,
                broker,
                registry,
                &config.broker.queue,
                config.worker.concurrency,
            );
            pool.run(watch_for_shutdown()).await?;
        }

        Command::Task(task) => {
            let (store, _broker) = open_backends(&config, cli.ephemeral)?;
            run_task_command(&store, task).await?;
        }
    }

    Ok(())
}

async fn run_task_command(store: &Arc<dyn Store>, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add {
            name,
            every,
            period,
            cron,
            action,
            args,
            queue,
            description,
        } => {
            let cadence = match (cron, every) {
                (Some(expression), _) => Cadence::Crontab(Crontab::parse(&expression)?),
                (None, Some(every)) => {
                    let period: Period = period.as_deref().unwrap_or("minutes").parse()?;
                    Cadence::Interval { every, period }
                }
                (None, None) => anyhow::bail!("specify --cron or --every (with --period)"),
            };
            let args: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;

            let mut entry = ScheduleEntry::new(
                &name,
                cadence,
                ActionRef::new(&action, args),
                chrono::Utc::now(),
            )?;
            entry.queue = queue;
            entry.description = description;

            entry::save_new(store, &entry).await?;
            println!(
                "✅ Added '{}' ({}), next due {}",
                entry.name, entry.cadence, entry.next_due
            );
        }

        TaskCommand::List => {
            let (entries, broken) = entry::load_all(store).await?;
            let quarantined = entry::load_quarantined(store).await?;
            if entries.is_empty() && broken.is_empty() && quarantined.is_empty() {
                println!("No schedule entries.");
                return Ok(());
            }
            println!(
                "{:<24} {:<20} {:<8} {:<25} {:<8} outcome",
                "NAME", "CADENCE", "ENABLED", "NEXT DUE", "RUNS"
            );
            for (entry, _) in entries {
                let outcome = match &entry.last_outcome {
                    None => "-".to_string(),
                    Some(o) if o.is_success() => "ok".to_string(),
                    Some(_) => "failed".to_string(),
                };
                println!(
                    "{:<24} {:<20} {:<8} {:<25} {:<8} {outcome}",
                    entry.name,
                    entry.cadence.to_string(),
                    entry.enabled,
                    entry.next_due.to_rfc3339(),
                    entry.total_run_count,
                );
            }
            for (key, reason) in broken {
                println!("⚠️  {key}: undecodable ({reason})");
            }
            for (name, _) in quarantined {
                println!("🚧 {name}: quarantined (stored form no longer decodes)");
            }
        }

        TaskCommand::Remove { name } => {
            if entry::remove(store, &name).await? {
                println!("🗑️  Removed '{name}'");
            } else {
                println!("No entry named '{name}'");
            }
        }

        TaskCommand::Enable { name } => {
            if entry::set_enabled(store, &name, true).await? {
                println!("✅ Enabled '{name}'");
            } else {
                println!("No entry named '{name}'");
            }
        }

        TaskCommand::Disable { name } => {
            if entry::set_enabled(store, &name, false).await? {
                println!("⏸️  Disabled '{name}'");
            } else {
                println!("No entry named '{name}'");
            }
        }
    }
    Ok(())
}
