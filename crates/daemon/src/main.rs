use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use band_power::{
    capture_baseline, CalibrationStore, Engine, FeedbackEvaluator, JsonFileCalibrationStore,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod mock_eeg;
mod session;

/// Real-time EEG band power daemon driven by a simulated headset
#[derive(Parser, Debug)]
#[command(name = "band_power_daemon", version, about)]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start with the high-pass and notch filters disabled
    #[arg(long)]
    no_filter: bool,

    /// Capture a new resting baseline for this many seconds after startup
    #[arg(long)]
    calibrate_secs: Option<u64>,

    /// Where the calibration baseline is read from and written to
    #[arg(long, default_value = "baseline.json")]
    baseline: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "band_power=info,band_power_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Band power daemon starting...");

    let mut config = config::load_config(args.config.as_deref())?;
    if args.no_filter {
        config.engine.filter.enabled = false;
    }

    let engine = Engine::new(config.engine.clone()).context("Failed to create engine")?;

    // --- Calibration baseline ---
    let store = JsonFileCalibrationStore::new(&args.baseline);
    let mut evaluator = FeedbackEvaluator::new(config.feedback.clone());
    match store.load_latest().await {
        Ok(Some(baseline)) => {
            info!(
                path = %store.path().display(),
                captured_at_ms = baseline.captured_at_ms,
                bands = ?baseline.bands,
                "Loaded calibration baseline"
            );
            evaluator.set_baseline(&baseline);
        }
        Ok(None) => info!("No saved calibration baseline; feedback uses a unit reference"),
        Err(e) => warn!("Ignoring unreadable calibration baseline: {}", e),
    }

    // --- Sample source and ingestion ---
    let shutdown = CancellationToken::new();
    let (batch_tx, batch_rx) = flume::bounded(256);
    let source = mock_eeg::SimulatedSource::new(&config.engine, config.simulation.clone());
    let source_handle = tokio::spawn(mock_eeg::run(source, batch_tx, shutdown.clone()));
    let ingest_handle = tokio::spawn(session::ingest_loop(engine.clone(), batch_rx));

    engine.start()?;

    if let Some(secs) = args.calibrate_secs {
        let mut subscription = engine.subscribe_named("calibration");
        let baseline = capture_baseline(&mut subscription, Duration::from_secs(secs)).await?;
        engine.unsubscribe(subscription);

        store
            .save(&baseline)
            .await
            .with_context(|| format!("Failed to save baseline to '{}'", store.path().display()))?;
        evaluator.set_baseline(&baseline);
    }

    let report_handle = tokio::spawn(session::report_loop(
        engine.subscribe_named("daemon"),
        evaluator,
        shutdown.clone(),
    ));

    // --- Graceful Shutdown ---
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping services...");

    engine.stop();
    shutdown.cancel();

    source_handle.await?;
    let batches = ingest_handle.await?;
    let reported = report_handle.await?;

    let stats = engine.stats();
    info!(
        batches,
        reported,
        ticks = stats.ticks,
        numeric_anomalies = stats.numeric_anomalies,
        unknown_channel_batches = stats.unknown_channel_batches,
        "Band power daemon stopped gracefully."
    );
    Ok(())
}
