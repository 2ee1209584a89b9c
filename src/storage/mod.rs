//! Persistence layer.
//!
//! Defines the append-only `TimeSeriesStore` and its transactional scope.
//! Every read and write of a tick goes through one `StoreTransaction`;
//! dropping or rolling it back leaves the store as if the tick never ran.
//!
//! Backends: SQLite via sqlx (production) and an in-memory store (tests,
//! dry runs).

pub mod memory;
pub mod schema;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{AppConfig, StorageBackend};
use crate::types::{Alert, AssetSymbol, Sample, StatRecord, StoreError};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Selection criteria for [`StoreTransaction::query_alerts`].
/// Unset fields match everything. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub asset: Option<AssetSymbol>,
    pub since: Option<DateTime<Utc>>,
    pub subscriber: Option<String>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn for_asset(mut self, asset: AssetSymbol) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn for_subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// In-process evaluation, shared by backends that cannot push the
    /// filter down to a query.
    pub fn matches(&self, alert: &Alert) -> bool {
        self.asset.as_ref().map_or(true, |a| &alert.asset == a)
            && self.since.map_or(true, |t| alert.timestamp >= t)
            && self
                .subscriber
                .as_ref()
                .map_or(true, |s| alert.subscriber.as_deref() == Some(s.as_str()))
    }
}

/// Handle to a time-series store. Opened before the scheduler starts and
/// closed on shutdown.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Open a transactional scope for one tick.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Release connections. The handle must not be used afterwards.
    async fn close(&self);

    /// Backend name for logging.
    fn backend(&self) -> &'static str;
}

/// Reads and writes within one transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn append_sample(&mut self, sample: &Sample) -> Result<(), StoreError>;

    /// Samples for `asset` with `timestamp >= since`, oldest first.
    async fn query_samples(
        &mut self,
        asset: &AssetSymbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError>;

    /// The `limit` most recent samples for `asset`, oldest first.
    async fn query_recent(
        &mut self,
        asset: &AssetSymbol,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError>;

    async fn append_stat(&mut self, stat: &StatRecord) -> Result<(), StoreError>;

    /// Persist an alert unless one with the same identity exists.
    /// Returns `true` when a new row was written.
    async fn append_alert(&mut self, alert: &Alert) -> Result<bool, StoreError>;

    async fn query_alerts(&mut self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Open the configured backend, creating the schema if needed.
pub async fn open(cfg: &AppConfig) -> Result<Box<dyn TimeSeriesStore>> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory store; nothing will be persisted");
            Ok(Box::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let url = cfg.database_url();
            let store = SqliteStore::connect(&url, cfg.storage.max_connections)
                .await
                .context("Failed to open SQLite store")?;
            store.migrate().await.context("Failed to create schema")?;
            info!(max_connections = cfg.storage.max_connections, "SQLite store ready");
            Ok(Box::new(store))
        }
    }
}
