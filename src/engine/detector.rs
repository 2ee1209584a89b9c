//! Alert detection.
//!
//! Scans adjacent sample pairs of a window and emits one [`Alert`] per
//! pair whose absolute percent change exceeds the threshold. Every
//! crossing is reported on its own; nothing is coalesced. Detection is
//! deterministic, so rescanning an overlapping window reproduces the same
//! alerts and the store's identity check keeps them from being persisted
//! twice.

use chrono::Duration;
use tracing::{debug, warn};

use super::stats::percent_change;
use crate::types::{Alert, AssetSymbol, Sample, Subscription, TickError};

// ---------------------------------------------------------------------------
// Interval formatting
// ---------------------------------------------------------------------------

const SECS_PER_DAY: i64 = 86_400;

/// Format an elapsed duration as `H:MM:SS`, or `N day(s), H:MM:SS` past a
/// day. Sub-second precision is truncated.
pub fn format_interval(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let days = total / SECS_PER_DAY;
    let rem = total % SECS_PER_DAY;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => format!("{h}:{m:02}:{s:02}"),
        1 => format!("1 day, {h}:{m:02}:{s:02}"),
        d => format!("{d} days, {h}:{m:02}:{s:02}"),
    }
}

/// Inverse of [`format_interval`].
pub fn parse_interval(text: &str) -> Option<Duration> {
    let (days, clock) = match text.split_once(", ") {
        Some((day_part, clock)) => {
            let mut words = day_part.split_whitespace();
            let n: i64 = words.next()?.parse().ok()?;
            match words.next()? {
                "day" | "days" => {}
                _ => return None,
            }
            (n, clock)
        }
        None => (0, text),
    };

    let mut parts = clock.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0..60).contains(&m) || !(0..60).contains(&s) || h < 0 {
        return None;
    }

    Some(Duration::days(days) + Duration::hours(h) + Duration::minutes(m) + Duration::seconds(s))
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Alerts found in one window, plus the pairs that could not be compared.
#[derive(Debug, Default)]
pub struct Detection {
    pub alerts: Vec<Alert>,
    pub invalid_pairs: Vec<TickError>,
}

/// Pairwise threshold detector.
#[derive(Debug, Clone)]
pub struct AlertDetector {
    threshold_pct: f64,
    subscriber: Option<String>,
}

impl AlertDetector {
    /// Detector for the global threshold.
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct, subscriber: None }
    }

    /// Detector applying a subscription's own threshold; its alerts are
    /// tagged with the subscriber.
    pub fn for_subscription(sub: &Subscription) -> Self {
        Self {
            threshold_pct: sub.threshold_pct,
            subscriber: Some(sub.subscriber.clone()),
        }
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// Alerts for every crossing in `window` (ascending by timestamp).
    pub fn detect(&self, asset: &AssetSymbol, window: &[Sample]) -> Vec<Alert> {
        self.scan(asset, window).alerts
    }

    /// Like [`detect`](Self::detect), also reporting skipped pairs.
    pub fn scan(&self, asset: &AssetSymbol, window: &[Sample]) -> Detection {
        let mut detection = Detection::default();

        for pair in window.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);

            if prev.timestamp >= cur.timestamp {
                debug!(asset = %asset, at = %cur.timestamp, "Skipping pair without elapsed time");
                continue;
            }

            let Some(change) = percent_change(prev.price, cur.price) else {
                warn!(
                    asset = %asset,
                    price = prev.price,
                    at = %prev.timestamp,
                    "Invalid baseline price, skipping comparison"
                );
                detection.invalid_pairs.push(TickError::InvalidBaselinePrice {
                    asset: asset.clone(),
                    price: prev.price,
                    at: prev.timestamp,
                });
                continue;
            };

            if change.abs() > self.threshold_pct {
                detection.alerts.push(Alert {
                    timestamp: cur.timestamp,
                    previous_timestamp: prev.timestamp,
                    asset: asset.clone(),
                    start_price: prev.price,
                    end_price: cur.price,
                    price_change_pct: change,
                    time_interval: format_interval(cur.timestamp - prev.timestamp),
                    subscriber: self.subscriber.clone(),
                });
            }
        }

        if !detection.alerts.is_empty() {
            debug!(
                asset = %asset,
                crossings = detection.alerts.len(),
                threshold = self.threshold_pct,
                subscriber = ?self.subscriber,
                "Crossings detected"
            );
        }

        detection
    }
}
