//! VOLWATCH: periodic price sampler with rolling stats and volatility alerts
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, and runs the sample → stats → alert loop with
//! graceful shutdown.

use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use volwatch::clock::SystemClock;
use volwatch::config::{self, AppConfig};
use volwatch::engine::{Pipeline, PipelineSettings};
use volwatch::notify::slack::SlackNotifier;
use volwatch::source::coingecko::CoinGeckoClient;
use volwatch::storage;
use volwatch::types::{AssetSymbol, TickReport};

const BANNER: &str = r#"
 __     _____  _ __        ___  _____ ____ _   _
 \ \   / / _ \| |\ \      / / \|_   _/ ___| | | |
  \ \ / / | | | | \ \ /\ / / _ \ | || |   | |_| |
   \ V /| |_| | |__\ V  V / ___ \| || |___|  _  |
    \_/  \___/|_____\_/\_/_/   \_\_| \____|_| |_|

  Price sampler & volatility alerts  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_default()?;

    init_logging();

    println!("{BANNER}");
    info!(
        assets = cfg.tracker.assets.len(),
        interval_secs = cfg.tracker.interval_secs,
        threshold_pct = cfg.alerts.threshold_pct,
        subscriptions = cfg.alerts.subscriptions.len(),
        backend = ?cfg.storage.backend,
        "VOLWATCH starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = storage::open(&cfg).await?;

    let api_key = cfg.source.api_key_env.as_deref().and_then(AppConfig::resolve_secret);
    let source = CoinGeckoClient::new(&cfg.source, &cfg.tracker.assets, api_key)?;

    let notifier = SlackNotifier::new(
        AppConfig::resolve_secret(&cfg.notifier.slack_webhook_env),
        cfg.notifier.timeout_secs,
    )?;
    if !notifier.is_configured() {
        warn!(
            env = %cfg.notifier.slack_webhook_env,
            "No Slack webhook configured; alerts will be persisted but not sent"
        );
    }

    let pipeline = Pipeline::new(
        Box::new(source),
        store,
        Box::new(notifier),
        PipelineSettings::from_config(&cfg),
    );

    match pipeline.latest_alert().await {
        Ok(Some(alert)) => info!(%alert, at = %alert.timestamp, "Last recorded alert"),
        Ok(None) => info!("No alerts recorded yet"),
        Err(e) => warn!(error = %e, "Could not read last alert"),
    }

    let assets = cfg.asset_set();
    let clock = SystemClock;

    if cfg.tracker.run_once {
        run_and_log(&pipeline, &clock, &assets, cfg.alerts.threshold_pct).await;
        pipeline.shutdown().await;
        return Ok(());
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tick_interval(cfg.tracker.interval_secs);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.tracker.interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_and_log(&pipeline, &clock, &assets, cfg.alerts.threshold_pct).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    pipeline.shutdown().await;
    info!("VOLWATCH shut down cleanly.");

    Ok(())
}

/// Fixed-cadence scheduler. A slow tick delays the next one instead of
/// triggering a burst of catch-up ticks.
fn tick_interval(secs: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Run one tick; failures are logged and the loop carries on.
async fn run_and_log(
    pipeline: &Pipeline,
    clock: &SystemClock,
    assets: &BTreeSet<AssetSymbol>,
    threshold_pct: f64,
) {
    match pipeline.run_tick(clock, assets, threshold_pct).await {
        Ok(report) => log_tick_report(&report),
        Err(e) => error!(error = %e, "Tick failed, continuing to next"),
    }
}

/// Log a human-readable tick summary.
fn log_tick_report(report: &TickReport) {
    for err in &report.errors {
        warn!(tick_id = %report.tick_id, error = %err, "Tick issue");
    }
    info!(
        tick_id = %report.tick_id,
        at = %report.timestamp,
        samples = report.samples_ingested,
        stats = report.stats_computed,
        alerts = report.alerts_raised,
        errors = report.errors.len(),
        "{report}"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("volwatch=info"));

    let json_logging = std::env::var(config::LOG_JSON_ENV).is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
