//! Statistics engine.
//!
//! Turns a 24h window of samples into a [`StatRecord`]: instant and 24h
//! percent change, high/low, and short-window volatility. Pure functions
//! over slices; the caller decides which samples form the window.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{AssetSymbol, Sample, StatRecord, StatsError};

/// Default volatility tail: 30 minutes at a 5-minute cadence.
pub const DEFAULT_VOLATILITY_SAMPLES: usize = 6;

/// Percent change from `previous` to `current`.
///
/// `None` when the baseline is zero, negative or not finite; callers turn
/// that into `InvalidBaselinePrice` rather than propagating inf/NaN.
pub fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if !(previous.is_finite() && previous > 0.0 && current.is_finite()) {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// Sample standard deviation (n - 1). `0.0` for fewer than two values.
pub fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (n - 1.0)).sqrt()
}

pub struct StatsEngine {
    volatility_samples: usize,
}

impl Default for StatsEngine {
    fn default() -> Self {
        Self::new(DEFAULT_VOLATILITY_SAMPLES)
    }
}

impl StatsEngine {
    pub fn new(volatility_samples: usize) -> Self {
        Self { volatility_samples: volatility_samples.max(2) }
    }

    /// Derive statistics for `asset` at tick time `at`.
    ///
    /// `window` must be ascending and already scoped to the lookback
    /// period; high/low are taken over all of it. Returns `Ok(None)` when
    /// fewer than two samples are available.
    pub fn compute(
        &self,
        asset: &AssetSymbol,
        window: &[Sample],
        reference_24h: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<StatRecord>, StatsError> {
        let [.., prev, last] = window else {
            debug!(asset = %asset, samples = window.len(), "Not enough samples for stats");
            return Ok(None);
        };

        let price_change_pct = percent_change(prev.price, last.price).ok_or_else(|| {
            StatsError::InvalidBaselinePrice {
                asset: asset.clone(),
                price: prev.price,
                at: prev.timestamp,
            }
        })?;

        // Earliest sample inside the 24h window; falls back to whatever
        // history exists when the asset is younger than 24h.
        let price_change_24h_pct = match window.iter().find(|s| s.timestamp >= reference_24h) {
            Some(base) => percent_change(base.price, last.price).ok_or_else(|| {
                StatsError::InvalidBaselinePrice {
                    asset: asset.clone(),
                    price: base.price,
                    at: base.timestamp,
                }
            })?,
            None => 0.0,
        };

        let (low_24h, high_24h) = window.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), s| (lo.min(s.price), hi.max(s.price)),
        );

        let tail_start = window.len().saturating_sub(self.volatility_samples);
        let tail: Vec<f64> = window[tail_start..].iter().map(|s| s.price).collect();
        let volume_window_stddev = sample_stddev(&tail);

        Ok(Some(StatRecord {
            timestamp: at,
            asset: asset.clone(),
            current_price: last.price,
            price_change_pct,
            price_change_24h_pct,
            volume_window_stddev,
            high_24h,
            low_24h,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn btc() -> AssetSymbol {
        AssetSymbol::new("BTC").unwrap()
    }

    /// Samples spaced five minutes apart, the last one at `now()`.
    fn window(prices: &[f64]) -> Vec<Sample> {
        let n = prices.len() as i64;
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Sample::new(btc(), now() - Duration::minutes(5 * (n - 1 - i as i64)), p))
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_percent_change() {
        assert!(approx(percent_change(100.0, 103.0).unwrap(), 3.0));
        assert!(approx(percent_change(101.0, 99.0).unwrap(), -1.9801980198019802));
        assert_eq!(percent_change(0.0, 5.0), None);
        assert_eq!(percent_change(-1.0, 5.0), None);
        assert_eq!(percent_change(f64::NAN, 5.0), None);
    }

    #[test]
    fn test_sample_stddev() {
        assert_eq!(sample_stddev(&[]), 0.0);
        assert_eq!(sample_stddev(&[42.0]), 0.0);
        // mean 5, squared deviations sum to 32, n - 1 = 7
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx(sample_stddev(&v), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn test_fewer_than_two_samples_yields_none() {
        let engine = StatsEngine::default();
        let reference = now() - Duration::hours(24);
        assert_eq!(engine.compute(&btc(), &[], reference, now()).unwrap(), None);
        assert_eq!(engine.compute(&btc(), &window(&[100.0]), reference, now()).unwrap(), None);
    }

    #[test]
    fn test_basic_stats() {
        let engine = StatsEngine::default();
        let w = window(&[100.0, 110.0, 90.0, 99.0]);
        let stat = engine
            .compute(&btc(), &w, now() - Duration::hours(24), now())
            .unwrap()
            .unwrap();

        assert_eq!(stat.timestamp, now());
        assert_eq!(stat.current_price, 99.0);
        assert!(approx(stat.price_change_pct, 10.0));
        assert!(approx(stat.price_change_24h_pct, -1.0));
        assert_eq!(stat.high_24h, 110.0);
        assert_eq!(stat.low_24h, 90.0);
        assert!(approx(stat.volume_window_stddev, sample_stddev(&[100.0, 110.0, 90.0, 99.0])));
    }

    #[test]
    fn test_volatility_uses_only_the_tail() {
        let engine = StatsEngine::new(3);
        let w = window(&[1000.0, 10.0, 10.0, 10.0]);
        let stat = engine
            .compute(&btc(), &w, now() - Duration::hours(24), now())
            .unwrap()
            .unwrap();
        assert_eq!(stat.volume_window_stddev, 0.0);
        assert_eq!(stat.high_24h, 1000.0);
    }

    #[test]
    fn test_24h_change_falls_back_to_earliest_sample() {
        // Oldest sample is only 2h old: the 24h change uses it.
        let engine = StatsEngine::default();
        let w = vec![
            Sample::new(btc(), now() - Duration::hours(2), 200.0),
            Sample::new(btc(), now() - Duration::hours(1), 210.0),
            Sample::new(btc(), now(), 220.0),
        ];
        let stat = engine
            .compute(&btc(), &w, now() - Duration::hours(24), now())
            .unwrap()
            .unwrap();
        assert!(approx(stat.price_change_24h_pct, 10.0));
    }

    #[test]
    fn test_24h_change_is_zero_without_qualifying_sample() {
        let engine = StatsEngine::default();
        let w = window(&[100.0, 105.0]);
        // Reference after every sample: nothing qualifies.
        let stat = engine
            .compute(&btc(), &w, now() + Duration::minutes(1), now())
            .unwrap()
            .unwrap();
        assert_eq!(stat.price_change_24h_pct, 0.0);
    }

    #[test]
    fn test_zero_previous_price_is_invalid_baseline() {
        let engine = StatsEngine::default();
        let w = window(&[100.0, 0.0, 50.0]);
        let err = engine
            .compute(&btc(), &w, now() - Duration::hours(24), now())
            .unwrap_err();
        assert!(matches!(err, StatsError::InvalidBaselinePrice { price, .. } if price == 0.0));
    }

    #[test]
    fn test_zero_24h_baseline_is_invalid() {
        let engine = StatsEngine::default();
        let w = window(&[0.0, 50.0, 55.0]);
        let err = engine
            .compute(&btc(), &w, now() - Duration::hours(24), now())
            .unwrap_err();
        assert_eq!(
            err,
            StatsError::InvalidBaselinePrice { asset: btc(), price: 0.0, at: w[0].timestamp }
        );
    }
}
