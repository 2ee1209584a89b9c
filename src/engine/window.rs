//! Window extraction.
//!
//! Thin range queries over the tick's transaction. Time-bounded windows
//! feed the statistics engine; count-bounded windows feed the detector.
//! Which policy applies is the caller's choice.

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::storage::StoreTransaction;
use crate::types::{AssetSymbol, Sample, StoreError};

/// Samples for `asset` with `timestamp >= since`, ascending. Empty when
/// nothing qualifies.
pub async fn window(
    tx: &mut dyn StoreTransaction,
    asset: &AssetSymbol,
    since: DateTime<Utc>,
) -> Result<Vec<Sample>, StoreError> {
    let samples = tx.query_samples(asset, since).await?;
    debug_assert!(is_ascending(&samples));
    trace!(asset = %asset, since = %since, count = samples.len(), "Time window extracted");
    Ok(samples)
}

/// The last `limit` samples for `asset`, ascending.
pub async fn recent(
    tx: &mut dyn StoreTransaction,
    asset: &AssetSymbol,
    limit: usize,
) -> Result<Vec<Sample>, StoreError> {
    let samples = tx.query_recent(asset, limit).await?;
    debug_assert!(is_ascending(&samples));
    trace!(asset = %asset, limit, count = samples.len(), "Count window extracted");
    Ok(samples)
}

/// Start of a lookback window ending at `now`.
pub fn lookback_start(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    now - lookback
}

fn is_ascending(samples: &[Sample]) -> bool {
    samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}
