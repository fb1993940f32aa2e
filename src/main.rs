// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! TourGuard - Tourist Safety Scoring Service
//!
//! Headless service binary: opens the store, builds the safety engine,
//! runs the training, sweep and queue loops and routes alerts until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tourguard::{AlertRouter, Config, Database, EventBus, FileModelStore, ModelStore, SafetyEngine, Scheduler, VERSION};

/// TourGuard - Tourist Safety Scoring Service
#[derive(Parser, Debug)]
#[command(name = "tourguard")]
#[command(author = "TourGuard Project")]
#[command(version = VERSION)]
#[command(about = "Hybrid geofence, anomaly and temporal safety scoring for tourists")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Skip the forced training pass at startup
    #[arg(long)]
    no_initial_training: bool,

    /// Data directory (database and models)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(data_dir) = args.data_dir {
        config = config.with_data_dir(data_dir);
    }
    if args.no_initial_training {
        config.lifecycle.initial_training = false;
    }

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("TourGuard v{} - Tourist Safety Scoring Service", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.database)?);
    let stats = db.stats()?;
    info!(
        "Store holds {} tourists, {} locations, {} zones, {} assessments",
        stats.tourists, stats.locations, stats.zones, stats.assessments
    );

    let event_bus = Arc::new(EventBus::new(config.realtime.queue_capacity));
    let model_store: Arc<dyn ModelStore> = Arc::new(FileModelStore::new(config.model_dir.clone()));

    let engine = Arc::new(SafetyEngine::new(config, db, Some(model_store), event_bus.clone()));
    engine.initialize().await?;

    let scheduler = Scheduler::new();
    engine.spawn_background(&scheduler).await;

    let router = Arc::new(AlertRouter::new());
    let bus = event_bus.clone();
    scheduler
        .spawn_worker("alert-router", move |shutdown| router.run(bus, shutdown))
        .await;

    scheduler.start().await;

    info!("TourGuard running");
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    scheduler.shutdown().await;

    let stats = engine.stats();
    info!(
        "Processed {} assessments ({} failed), {} alerts, {} SOS events",
        stats.assessments, stats.assessment_failures, stats.alerts_emitted, stats.sos_events
    );
    info!("TourGuard shutdown complete");

    Ok(())
}
