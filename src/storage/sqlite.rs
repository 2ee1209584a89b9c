//! SQLite-backed time-series store.
//!
//! Responsible only for persistence and row mapping. All statements are
//! parameterised; no value is ever spliced into SQL text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::debug;

use super::{schema, AlertFilter, StoreTransaction, TimeSeriesStore};
use crate::types::{Alert, AssetSymbol, Sample, StatRecord, StoreError};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://volwatch.db` or `sqlite::memory:`),
    /// creating the database file if it does not exist.
    ///
    /// In-memory databases live per connection, so use
    /// `max_connections = 1` with `sqlite::memory:`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TimeSeriesStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("SQLite pool closed");
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn append_sample(&mut self, sample: &Sample) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO prices (asset, ts_ms, price)
VALUES (?, ?, ?);
"#,
        )
        .bind(sample.asset.as_str())
        .bind(sample.timestamp.timestamp_millis())
        .bind(sample.price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn query_samples(
        &mut self,
        asset: &AssetSymbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        let rows = sqlx::query(
            r#"
SELECT asset, ts_ms, price
FROM prices
WHERE asset = ? AND ts_ms >= ?
ORDER BY ts_ms ASC, id ASC;
"#,
        )
        .bind(asset.as_str())
        .bind(since.timestamp_millis())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_sample).collect()
    }

    async fn query_recent(
        &mut self,
        asset: &AssetSymbol,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError> {
        let rows = sqlx::query(
            r#"
SELECT asset, ts_ms, price FROM (
  SELECT id, asset, ts_ms, price
  FROM prices
  WHERE asset = ?
  ORDER BY ts_ms DESC, id DESC
  LIMIT ?
)
ORDER BY ts_ms ASC, id ASC;
"#,
        )
        .bind(asset.as_str())
        .bind(usize_to_i64(limit))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_sample).collect()
    }

    async fn append_stat(&mut self, stat: &StatRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO stats (
  ts_ms, asset, current_price, price_change_pct, price_change_24h_pct,
  volume_window_stddev, high_24h, low_24h
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(stat.timestamp.timestamp_millis())
        .bind(stat.asset.as_str())
        .bind(stat.current_price)
        .bind(stat.price_change_pct)
        .bind(stat.price_change_24h_pct)
        .bind(stat.volume_window_stddev)
        .bind(stat.high_24h)
        .bind(stat.low_24h)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_alert(&mut self, alert: &Alert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
INSERT OR IGNORE INTO alerts (
  ts_ms, previous_ts_ms, asset, start_price, end_price,
  price_change_pct, time_interval, subscriber
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(alert.timestamp.timestamp_millis())
        .bind(alert.previous_timestamp.timestamp_millis())
        .bind(alert.asset.as_str())
        .bind(alert.start_price)
        .bind(alert.end_price)
        .bind(alert.price_change_pct)
        .bind(alert.time_interval.as_str())
        .bind(alert.subscriber.as_deref().unwrap_or(""))
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query_alerts(&mut self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let asset = filter.asset.as_ref().map(|a| a.as_str().to_string());
        let since = filter.since.map(|t| t.timestamp_millis());
        // SQLite treats a negative LIMIT as "no limit".
        let limit = filter.limit.map_or(-1, usize_to_i64);

        let rows = sqlx::query(
            r#"
SELECT ts_ms, previous_ts_ms, asset, start_price, end_price,
       price_change_pct, time_interval, subscriber
FROM alerts
WHERE (? IS NULL OR asset = ?)
  AND (? IS NULL OR ts_ms >= ?)
  AND (? IS NULL OR subscriber = ?)
ORDER BY ts_ms DESC, id DESC
LIMIT ?;
"#,
        )
        .bind(asset.clone())
        .bind(asset)
        .bind(since)
        .bind(since)
        .bind(filter.subscriber.clone())
        .bind(filter.subscriber.clone())
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_alert).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_sample(r: &SqliteRow) -> Result<Sample, StoreError> {
    Ok(Sample {
        asset: parse_asset("prices", r.try_get("asset")?)?,
        timestamp: millis_to_utc("prices", r.try_get("ts_ms")?)?,
        price: r.try_get("price")?,
    })
}

fn row_to_alert(r: &SqliteRow) -> Result<Alert, StoreError> {
    let subscriber: String = r.try_get("subscriber")?;
    Ok(Alert {
        timestamp: millis_to_utc("alerts", r.try_get("ts_ms")?)?,
        previous_timestamp: millis_to_utc("alerts", r.try_get("previous_ts_ms")?)?,
        asset: parse_asset("alerts", r.try_get("asset")?)?,
        start_price: r.try_get("start_price")?,
        end_price: r.try_get("end_price")?,
        price_change_pct: r.try_get("price_change_pct")?,
        time_interval: r.try_get("time_interval")?,
        subscriber: (!subscriber.is_empty()).then_some(subscriber),
    })
}

fn parse_asset(table: &'static str, raw: String) -> Result<AssetSymbol, StoreError> {
    AssetSymbol::new(&raw).map_err(|e| StoreError::Corrupt { table, message: e.to_string() })
}

fn millis_to_utc(table: &'static str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        table,
        message: format!("timestamp out of range: {ms}"),
    })
}

fn usize_to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
