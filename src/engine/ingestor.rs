//! Sample ingestion.
//!
//! One provider call per tick. Every accepted price is stamped with the
//! same tick timestamp. Fetching is kept apart from persisting so a
//! provider outage is known before any write scope is opened.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::source::PriceSource;
use crate::storage::StoreTransaction;
use crate::types::{AssetSymbol, Sample, SourceError, StoreError, TickError};

/// Samples collected for one tick, plus per-asset rejections.
#[derive(Debug, Clone)]
pub struct IngestBatch {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<Sample>,
    pub errors: Vec<TickError>,
}

impl IngestBatch {
    /// Symbols that produced a sample this tick.
    pub fn assets(&self) -> BTreeSet<AssetSymbol> {
        self.samples.iter().map(|s| s.asset.clone()).collect()
    }

    /// Append every sample of the batch.
    pub async fn persist(&self, tx: &mut dyn StoreTransaction) -> Result<(), StoreError> {
        for sample in &self.samples {
            tx.append_sample(sample).await?;
        }
        debug!(count = self.samples.len(), "Samples appended");
        Ok(())
    }
}

/// Fetch one price per asset and stamp the tick.
///
/// A provider failure fails the whole call; a missing or unusable price
/// only drops that asset. Timestamps are truncated to milliseconds, the
/// store's resolution.
pub async fn ingest(
    source: &dyn PriceSource,
    assets: &BTreeSet<AssetSymbol>,
    clock: &dyn Clock,
) -> Result<IngestBatch, SourceError> {
    let prices = source.fetch(assets).await?;
    let timestamp = clock.now().trunc_subsecs(3);

    let mut samples = Vec::with_capacity(assets.len());
    let mut errors = Vec::new();

    for asset in assets {
        match prices.get(asset).copied() {
            Some(price) if price.is_finite() && price > 0.0 => {
                debug!(asset = %asset, price, "Price sampled");
                samples.push(Sample::new(asset.clone(), timestamp, price));
            }
            Some(price) => {
                warn!(asset = %asset, price, "Rejecting non-positive price");
                errors.push(TickError::InvalidAssetPrice { asset: asset.clone(), price });
            }
            None => {
                warn!(asset = %asset, "Asset missing from provider response");
                errors.push(TickError::MissingAssetPrice { asset: asset.clone() });
            }
        }
    }

    Ok(IngestBatch { timestamp, samples, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::source::MockPriceSource;
    use crate::storage::{MemoryStore, TimeSeriesStore};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn sym(s: &str) -> AssetSymbol {
        AssetSymbol::new(s).unwrap()
    }

    fn assets() -> BTreeSet<AssetSymbol> {
        ["BTC", "ETH", "XRP"].into_iter().map(sym).collect()
    }

    fn clock() -> ManualClock {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        ManualClock::new(t + Duration::microseconds(1_234_567))
    }

    #[tokio::test]
    async fn test_all_assets_share_one_timestamp() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().times(1).returning(|_| {
            Ok(HashMap::from([(sym("BTC"), 64000.0), (sym("ETH"), 3100.0), (sym("XRP"), 0.5)]))
        });

        let batch = ingest(&source, &assets(), &clock()).await.unwrap();
        assert_eq!(batch.samples.len(), 3);
        assert!(batch.errors.is_empty());
        assert!(batch.samples.iter().all(|s| s.timestamp == batch.timestamp));
        assert_eq!(batch.timestamp.timestamp_subsec_millis(), 234);
        assert_eq!(batch.timestamp.timestamp_subsec_nanos(), 234_000_000);
    }

    #[tokio::test]
    async fn test_missing_asset_only_skips_that_asset() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .returning(|_| Ok(HashMap::from([(sym("BTC"), 64000.0), (sym("XRP"), 0.5)])));

        let batch = ingest(&source, &assets(), &clock()).await.unwrap();
        assert_eq!(batch.assets(), [sym("BTC"), sym("XRP")].into_iter().collect());
        assert_eq!(batch.errors, vec![TickError::MissingAssetPrice { asset: sym("ETH") }]);
    }

    #[tokio::test]
    async fn test_non_positive_price_is_rejected() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().returning(|_| {
            Ok(HashMap::from([(sym("BTC"), 0.0), (sym("ETH"), -3.0), (sym("XRP"), f64::NAN)]))
        });

        let batch = ingest(&source, &assets(), &clock()).await.unwrap();
        assert!(batch.samples.is_empty());
        assert_eq!(batch.errors.len(), 3);
        assert!(batch
            .errors
            .iter()
            .all(|e| matches!(e, TickError::InvalidAssetPrice { .. })));
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .returning(|_| Err(SourceError::Transport("connection refused".into())));

        let result = ingest(&source, &assets(), &clock()).await;
        assert!(matches!(result, Err(SourceError::Transport(_))));
    }

    #[tokio::test]
    async fn test_persist_appends_each_sample() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .returning(|_| Ok(HashMap::from([(sym("BTC"), 1.0), (sym("ETH"), 2.0)])));
        let batch = ingest(&source, &assets(), &clock()).await.unwrap();

        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        batch.persist(tx.as_mut()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.samples().len(), 2);
    }
}
