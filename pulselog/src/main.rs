//! pulselog - CLI tool for driving the telemetry pipeline
//!
//! This tool provides commands for:
//! - Checking collector status and configuration
//! - Emitting synthetic events and flushing them to the collector
//! - Probing collector reachability
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/pulselog/config.toml (~/.config/pulselog/config.toml)
//! - Device id: $XDG_DATA_HOME/pulselog/device_id (~/.local/share/pulselog/device_id)
//! - Logs: $XDG_STATE_HOME/pulselog/pulselog.log (~/.local/state/pulselog/pulselog.log)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulselog_core::delivery::HttpDeliveryClient;
use pulselog_core::device::{DeviceIdProvider, FileDeviceId};
use pulselog_core::{Analytics, Config, EventPayload, EventType, SyncCoordinator, SyncOutcome};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pulselog")]
#[command(about = "Record telemetry events and deliver them to a collector")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show effective configuration and collector status
    Status,

    /// Record synthetic events, then flush them once
    Emit {
        /// Number of events to record
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Event type (click, swipe, process, load, close, visit, change_focus)
        #[arg(short = 't', long = "type", default_value = "click")]
        event_type: EventType,

        /// Screen/surface label attached to each event
        #[arg(short, long = "where", default_value = "cli")]
        where_: String,

        /// Only record; skip delivery
        #[arg(long)]
        no_flush: bool,
    },

    /// Check that the collector is reachable
    Health,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(pulselog_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Emit {
            count,
            event_type,
            where_,
            no_flush,
        } => cmd_emit(&config, count, event_type, &where_, no_flush),
        Command::Health => cmd_health(&config),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Pipeline Configuration");
    println!("======================");
    println!();
    println!("Buffer Capacity: {}", config.buffer.capacity);
    println!("Flush Threshold: {}", config.buffer.flush_threshold);
    println!("Session Timeout: {}m", config.session.timeout_minutes);
    println!("Debounce:        {}ms", config.sync.debounce_ms);
    println!("Max Attempts:    {}", config.sync.max_attempts);
    println!("Retry Delay:     {}ms", config.sync.retry_delay_ms);
    println!("Source:          {}", config.sync.source);
    println!(
        "Log File:        {}",
        pulselog_core::logging::log_file_path().display()
    );
    println!();

    let collector = &config.collector;
    println!("Collector");
    println!("---------");
    println!("Enabled:         {}", collector.enabled);

    if !collector.enabled {
        println!();
        println!("Collector is disabled. Enable it in config.toml:");
        println!();
        println!("  [collector]");
        println!("  enabled = true");
        println!("  server_url = \"https://your-collector.example.com\"");
        return Ok(());
    }

    println!(
        "Server URL:      {}",
        collector.server_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "API Key:         {}",
        if collector.api_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Timeout:         {}s", collector.timeout_secs);

    println!();
    if collector.is_ready() {
        println!("Status: Ready to deliver");
    } else {
        println!("Status: Not ready (missing required configuration)");
    }

    Ok(())
}

fn cmd_emit(
    config: &Config,
    count: usize,
    event_type: EventType,
    where_: &str,
    no_flush: bool,
) -> Result<()> {
    let analytics = Arc::new(Analytics::from_config(config));

    for i in 0..count {
        analytics.record(
            event_type,
            where_,
            EventPayload::default().with_extra("sequence", i),
        );
    }

    println!("Recorded {} event(s)", count);
    println!("Session:         {}", analytics.current_session_id());
    println!("Pending:         {}", analytics.pending_count());
    if analytics.buffer().overflow_count() > 0 {
        println!(
            "Overflowed:      {} time(s); earlier events were discarded",
            analytics.buffer().overflow_count()
        );
    }

    if no_flush {
        return Ok(());
    }
    if !config.collector.is_ready() {
        println!();
        println!("Collector is not configured. Run 'status' for details.");
        return Ok(());
    }

    let device: Arc<dyn DeviceIdProvider> = Arc::new(FileDeviceId::default_location());
    let client = Arc::new(
        HttpDeliveryClient::new(&config.collector, Arc::clone(&device))
            .context("failed to create delivery client")?,
    );
    let sync = SyncCoordinator::from_config(
        &config.sync,
        Arc::clone(analytics.buffer()),
        client,
        device,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .context("failed to install Ctrl-C handler")?;

    println!();
    println!("Flushing {} pending event(s)...", analytics.pending_count());

    let outcome = runtime()?.block_on(sync.flush_once(&cancel));
    analytics.shutdown();

    let delivered = outcome.is_success();
    match outcome {
        SyncOutcome::Success { count } => println!("Delivered {} event(s)", count),
        SyncOutcome::Failure { error, count } => {
            println!("Failed to deliver {} event(s): {}", count, error)
        }
        SyncOutcome::NoOp => println!("No events to deliver"),
        SyncOutcome::Coalesced => println!("Another flush was already running"),
    }
    if !delivered {
        println!("Pending:         {}", analytics.pending_count());
    }

    let stats = sync.stats();
    println!();
    println!("Stats:");
    println!("  API Calls:  {}", stats.api_calls);
    println!("  Sent:       {}", stats.events_sent);
    println!("  Failures:   {}", stats.api_failures);

    tracing::info!(
        recorded = count,
        sent = stats.events_sent,
        failures = stats.api_failures,
        "pulselog emit complete"
    );

    Ok(())
}

fn cmd_health(config: &Config) -> Result<()> {
    if !config.collector.is_ready() {
        println!("Collector is not configured. Run 'status' for details.");
        return Ok(());
    }

    let device: Arc<dyn DeviceIdProvider> = Arc::new(FileDeviceId::default_location());
    let client = HttpDeliveryClient::new(&config.collector, device)
        .context("failed to create delivery client")?;

    let healthy = runtime()?.block_on(client.health_check())?;
    if healthy {
        println!("Collector reachable at {}", client.batch_url());
    } else {
        println!("Collector unreachable");
    }

    Ok(())
}
