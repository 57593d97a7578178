//! aed: APRS emergency detector CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use aed_core::config::{self, Config};
use aed_core::filter::feed_filter;
use aed_core::{
    Classification, ClassifierStats, DecodedReport, EventClassifier, ManualClock, MicECategory,
    NotificationEvent, ReportCategory, WatchPolicy,
};

mod ingest;
mod notification;
mod render;

use notification::Dispatcher;

/// Reports between opportunistic cache prunes.
const PRUNE_EVERY: u64 = 500;

#[derive(Parser)]
#[command(name = "aed", version, about = "APRS emergency beacon detector")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (defaults to ~/.aed/config.yaml)
    #[arg(long, global = true, env = "AED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify decoded reports and notify on watched emergencies
    Run {
        /// Report file, one report per line. `-` reads stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Override the dedup window in minutes
        #[arg(long)]
        ttl: Option<u32>,

        /// Print short APRS-sized messages instead of the full text
        #[arg(long)]
        short: bool,
    },

    /// Send a synthetic EMERGENCY beacon at the observer position to all channels
    TestMessage {
        #[arg(long)]
        short: bool,
    },

    /// Validate the config file and print the effective settings
    CheckConfig,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "aed=debug,aed_core=debug"
    } else {
        "aed=info,aed_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(config::config_file);

    match cli.command {
        Commands::Run { input, ttl, short } => {
            let mut config = load(&config_path)?;
            if let Some(minutes) = ttl {
                config.watch.ttl_minutes = minutes;
                config.watch.validate()?;
            }
            cmd_run(config, input, short).await
        }
        Commands::TestMessage { short } => cmd_test_message(load(&config_path)?, short).await,
        Commands::CheckConfig => cmd_check_config(&load(&config_path)?, &config_path),
        Commands::Init { force } => cmd_init(&config_path, force),
    }
}

fn load(path: &Path) -> anyhow::Result<Config> {
    let config = config::load_config(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

async fn cmd_run(config: Config, input: PathBuf, short: bool) -> anyhow::Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(&config, short)?);
    let classifier = EventClassifier::new(config.watch);

    info!(
        policy = %classifier.policy().describe(),
        filter = %feed_filter(classifier.config()),
        channels = dispatcher.len(),
        "watching for emergency beacons"
    );

    // Plain thread: a blocked stdin read must not hold up runtime shutdown
    let (tx, mut rx) = mpsc::channel(256);
    let reader = thread::spawn(move || -> anyhow::Result<()> {
        let source = ingest::open_input(&input)?;
        for item in ingest::ReportReader::new(source) {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
        Ok(())
    });

    // Deliveries run off the read loop so a slow channel never delays classification
    let mut deliveries = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut bad_lines = 0u64;
    loop {
        tokio::select! {
            item = rx.recv() => {
                let Some((line_no, parsed)) = item else { break };
                match parsed {
                    Ok(report) => {
                        if let Some(event) = classify(&classifier, &report) {
                            deliveries.spawn(deliver(dispatcher.clone(), event));
                        }
                    }
                    Err(e) => {
                        bad_lines += 1;
                        warn!(line = line_no, "skipping input: {e:#}");
                    }
                }
                if classifier.stats().received % PRUNE_EVERY == 0 {
                    let pruned = classifier.prune(Utc::now());
                    if pruned > 0 {
                        debug!(pruned, "pruned dedup cache");
                    }
                }
            }
            Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                if let Err(e) = joined {
                    error!("delivery task failed: {e}");
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                print_stats(&classifier.stats(), bad_lines, classifier.tracked_sources());
                return Ok(());
            }
        }
    }

    // Input done; let in-flight deliveries finish (each is bounded by its channel timeout)
    loop {
        tokio::select! {
            joined = deliveries.join_next() => match joined {
                Some(Err(e)) => error!("delivery task failed: {e}"),
                Some(Ok(())) => {}
                None => break,
            },
            _ = &mut ctrl_c => {
                info!(pending = deliveries.len(), "interrupted, dropping pending deliveries");
                break;
            }
        }
    }

    match reader.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("input reader panicked"),
    }

    print_stats(&classifier.stats(), bad_lines, classifier.tracked_sources());
    Ok(())
}

fn classify(classifier: &EventClassifier, report: &DecodedReport) -> Option<NotificationEvent> {
    match classifier.classify(report) {
        Classification::Emitted(event) => Some(event),
        Classification::Suppressed(reason) => {
            debug!(source = %report.source_id, %reason, "suppressed");
            None
        }
    }
}

async fn deliver(dispatcher: Arc<Dispatcher>, event: NotificationEvent) {
    debug!(source = %event.source_id, "dispatching");
    let delivered = dispatcher.dispatch(&event).await;
    if delivered < dispatcher.len() {
        warn!(
            source = %event.source_id,
            delivered,
            channels = dispatcher.len(),
            "partial delivery"
        );
    }
}

async fn cmd_test_message(config: Config, short: bool) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::from_config(&config, short)?;

    // Fresh classifier with EMERGENCY watched so the test always goes through
    let mut watch = config.watch;
    watch.active_categories.insert(MicECategory::Emergency);
    watch.range_limit_km = None;
    let now = Utc::now();
    let classifier = EventClassifier::with_clock(watch, Arc::new(ManualClock::new(now)));

    let report = DecodedReport {
        source_id: "AED-TEST".into(),
        position: Some(classifier.config().observer),
        course: Some(0),
        speed: Some(0.0),
        category: ReportCategory::MicE(MicECategory::Emergency),
        received_at: now,
    };

    let event = classifier
        .classify(&report)
        .into_event()
        .context("test report was suppressed")?;
    let delivered = dispatcher.dispatch(&event).await;
    if delivered == dispatcher.len() {
        info!(delivered, "test message sent");
        Ok(())
    } else {
        error!(delivered, channels = dispatcher.len(), "test message not fully delivered");
        anyhow::bail!("{} of {} channels failed", dispatcher.len() - delivered, dispatcher.len())
    }
}

fn cmd_check_config(config: &Config, path: &Path) -> anyhow::Result<()> {
    let watch = &config.watch;
    let policy = WatchPolicy::from_config(watch);

    println!();
    println!("Config: {} (valid)", path.display());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec![Cell::new("Observer"), Cell::new(watch.observer)]);
    table.add_row(vec![Cell::new("Policy"), Cell::new(policy.describe())]);
    table.add_row(vec![
        Cell::new("Range limit"),
        Cell::new(
            watch
                .range_limit_km
                .map(|km| format!("{km} km"))
                .unwrap_or("unlimited".into()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Dedup TTL"),
        Cell::new(format!("{} min", watch.ttl_minutes)),
    ]);
    table.add_row(vec![Cell::new("Cache capacity"), Cell::new(watch.cache_capacity)]);
    table.add_row(vec![
        Cell::new("Units"),
        Cell::new(format!("{:?}", config.units).to_lowercase()),
    ]);
    table.add_row(vec![
        Cell::new("Webhook"),
        Cell::new(config.webhook.as_deref().unwrap_or("-")),
    ]);
    table.add_row(vec![Cell::new("Feed filter"), Cell::new(feed_filter(watch))]);

    println!("{table}");
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_config(&Config::default(), path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn print_stats(stats: &ClassifierStats, bad_lines: u64, tracked: usize) {
    println!();
    println!(
        "Reports: {} received, {} emitted, {} suppressed",
        stats.received,
        stats.emitted,
        stats.suppressed()
    );
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Outcome", "Count"]);
    let rows: [(&str, u64); 8] = [
        ("Emitted", stats.emitted),
        ("Not watched", stats.not_watched),
        ("Out of range", stats.out_of_range),
        ("Duplicate", stats.duplicates),
        ("Malformed report", stats.malformed),
        ("Unparseable line", bad_lines),
        ("Cache faults", stats.cache_faults),
        ("Tracked sources", tracked as u64),
    ];
    for (label, count) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(count)]);
    }
    println!("{table}");

    if stats.cache_faults > 0 {
        // A fault means the cache lock was poisoned; dedup may have let repeats through
        warn!(faults = stats.cache_faults, "dedup cache faults occurred");
    }
}
