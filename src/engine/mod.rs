//! Core engine: the sample → stats → detect → notify tick.
//!
//! [`Pipeline::run_tick`] is the single entry point. All store writes of a
//! tick share one transaction; any store error rolls the tick back and is
//! returned to the caller. Notification runs after commit.

pub mod detector;
pub mod dispatcher;
pub mod ingestor;
pub mod stats;
pub mod window;

use chrono::{Duration, SubsecRound};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::notify::Notifier;
use crate::source::PriceSource;
use crate::storage::{AlertFilter, StoreTransaction, TimeSeriesStore};
use crate::types::{
    Alert, AssetSymbol, StoreError, Subscription, TickError, TickFailure, TickReport,
};

use detector::AlertDetector;
use dispatcher::Dispatcher;
use ingestor::IngestBatch;
use stats::StatsEngine;

/// Tunables of the tick, independent of where prices come from.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Span of the statistics window.
    pub lookback: Duration,
    /// Number of most recent samples scanned by the global detector.
    pub detection_window_samples: usize,
    pub volatility_samples: usize,
    pub subscriptions: Vec<Subscription>,
    pub quote_currency: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            detection_window_samples: 50,
            volatility_samples: stats::DEFAULT_VOLATILITY_SAMPLES,
            subscriptions: Vec::new(),
            quote_currency: "usd".into(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            lookback: Duration::hours(i64::from(cfg.stats.lookback_hours)),
            detection_window_samples: cfg.alerts.detection_window_samples,
            volatility_samples: cfg.stats.volatility_samples,
            subscriptions: cfg.alerts.subscriptions.clone(),
            quote_currency: cfg.source.quote_currency.clone(),
        }
    }
}

pub struct Pipeline {
    source: Box<dyn PriceSource>,
    store: Box<dyn TimeSeriesStore>,
    notifier: Box<dyn Notifier>,
    settings: PipelineSettings,
    stats: StatsEngine,
    dispatcher: Dispatcher,
    /// Serialises overlapping ticks.
    tick_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn PriceSource>,
        store: Box<dyn TimeSeriesStore>,
        notifier: Box<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        let stats = StatsEngine::new(settings.volatility_samples);
        let dispatcher = Dispatcher::new(&settings.quote_currency);
        Self {
            source,
            store,
            notifier,
            settings,
            stats,
            dispatcher,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one full tick for `assets` against the global `threshold_pct`.
    ///
    /// Per-asset problems and notification failures are collected on the
    /// report. A store failure rolls back every write of the tick and is
    /// returned as `Err`.
    pub async fn run_tick(
        &self,
        clock: &dyn Clock,
        assets: &BTreeSet<AssetSymbol>,
        threshold_pct: f64,
    ) -> Result<TickReport, TickFailure> {
        let _guard = self.tick_lock.lock().await;
        let tick_id = Uuid::new_v4();
        let span = info_span!("tick", %tick_id);
        self.tick(tick_id, clock, assets, threshold_pct)
            .instrument(span)
            .await
    }

    async fn tick(
        &self,
        tick_id: Uuid,
        clock: &dyn Clock,
        assets: &BTreeSet<AssetSymbol>,
        threshold_pct: f64,
    ) -> Result<TickReport, TickFailure> {
        debug!(assets = assets.len(), threshold_pct, "Starting tick");

        // 1. Fetch, before any write scope is opened
        let batch = match ingestor::ingest(&*self.source, assets, clock).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Price source unavailable, skipping tick");
                let mut report = TickReport::new(tick_id, clock.now().trunc_subsecs(3));
                report.errors.push(TickError::SourceUnavailable(e.to_string()));
                return Ok(report);
            }
        };

        let mut report = TickReport::new(tick_id, batch.timestamp);
        report.errors.extend(batch.errors.iter().cloned());

        // 2-4. Persist, derive stats, detect, all in one transaction
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|source| TickFailure { tick_id, source })?;

        let fresh = match self.write_tick(tx.as_mut(), &batch, threshold_pct, &mut report).await {
            Ok(fresh) => fresh,
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    error!(error = %e, "Rollback failed");
                }
                error!(error = %source, "Tick rolled back");
                return Err(TickFailure { tick_id, source });
            }
        };

        tx.commit().await.map_err(|source| {
            error!(error = %source, "Commit failed");
            TickFailure { tick_id, source }
        })?;

        report.alerts_raised = fresh.len();
        for alert in &fresh {
            info!(%alert, "Volatility alert");
        }

        // 5. Notify, outside the transaction
        if let Err(e) = self.dispatcher.dispatch(&fresh, &*self.notifier).await {
            report.errors.push(TickError::Dispatch(e.to_string()));
        }

        info!(
            samples = report.samples_ingested,
            stats = report.stats_computed,
            alerts = report.alerts_raised,
            errors = report.errors.len(),
            "Tick complete"
        );
        Ok(report)
    }

    /// Every store write of a tick. Returns the alerts that were new.
    async fn write_tick(
        &self,
        tx: &mut dyn StoreTransaction,
        batch: &IngestBatch,
        threshold_pct: f64,
        report: &mut TickReport,
    ) -> Result<Vec<Alert>, StoreError> {
        batch.persist(tx).await?;
        report.samples_ingested = batch.samples.len();

        let now = batch.timestamp;
        let reference = window::lookback_start(now, self.settings.lookback);
        let global = AlertDetector::new(threshold_pct);
        let mut fresh = Vec::new();

        for asset in batch.assets() {
            let stats_window = window::window(tx, &asset, reference).await?;
            match self.stats.compute(&asset, &stats_window, reference, now) {
                Ok(Some(stat)) => {
                    tx.append_stat(&stat).await?;
                    report.stats_computed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Stats skipped");
                    record(report, e.into());
                }
            }

            let recent = window::recent(tx, &asset, self.settings.detection_window_samples).await?;
            let mut detections = vec![global.scan(&asset, &recent)];

            for sub in self.settings.subscriptions.iter().filter(|s| s.asset == asset) {
                let since = now - Duration::minutes(i64::from(sub.window_minutes));
                let sub_window = window::window(tx, &asset, since).await?;
                detections.push(AlertDetector::for_subscription(sub).scan(&asset, &sub_window));
            }

            for detection in detections {
                for err in detection.invalid_pairs {
                    record(report, err);
                }
                for alert in detection.alerts {
                    if tx.append_alert(&alert).await? {
                        fresh.push(alert);
                    } else {
                        debug!(%alert, "Alert already recorded");
                    }
                }
            }
        }

        Ok(fresh)
    }

    /// Most recent persisted alert, if any.
    pub async fn latest_alert(&self) -> Result<Option<Alert>, StoreError> {
        let mut tx = self.store.begin().await?;
        let alerts = tx.query_alerts(&AlertFilter::default().limit(1)).await;
        tx.rollback().await?;
        Ok(alerts?.into_iter().next())
    }

    /// Release the store. Waits for a tick in flight to finish.
    pub async fn shutdown(&self) {
        let _guard = self.tick_lock.lock().await;
        self.store.close().await;
        info!(backend = self.store.backend(), "Store closed");
    }
}

/// Push `err` unless the same condition is already on the report.
fn record(report: &mut TickReport, err: TickError) {
    if !report.errors.contains(&err) {
        report.errors.push(err);
    }
}
