use sqlx::SqlitePool;

use crate::types::StoreError;

/// Create tables and indexes. Idempotent.
///
/// Timestamps are stored as Unix milliseconds (UTC). Alerts carry a unique
/// identity so re-detected crossings are ignored on insert; the global
/// threshold is stored with an empty subscriber so it takes part in the
/// uniqueness check.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS prices (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  asset TEXT NOT NULL,
  ts_ms INTEGER NOT NULL,
  price REAL NOT NULL CHECK (price > 0)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS stats (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  asset TEXT NOT NULL,
  current_price REAL NOT NULL,
  price_change_pct REAL NOT NULL,
  price_change_24h_pct REAL NOT NULL,
  volume_window_stddev REAL NOT NULL,
  high_24h REAL NOT NULL,
  low_24h REAL NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS alerts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  previous_ts_ms INTEGER NOT NULL,
  asset TEXT NOT NULL,
  start_price REAL NOT NULL,
  end_price REAL NOT NULL,
  price_change_pct REAL NOT NULL,
  time_interval TEXT NOT NULL,
  subscriber TEXT NOT NULL DEFAULT '',
  UNIQUE (asset, previous_ts_ms, ts_ms, subscriber)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_prices_asset_ts ON prices(asset, ts_ms);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_stats_asset_ts ON stats(asset, ts_ms);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts_ms);"#)
        .execute(pool)
        .await?;

    Ok(())
}
