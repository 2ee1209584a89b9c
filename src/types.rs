//! Shared types for VOLWATCH.
//!
//! Samples, derived statistics, alerts and the per-tick report, plus the
//! error taxonomy shared by every pipeline stage. Collaborator traits live
//! next to their adapters (`source`, `storage`, `notify`) and depend on
//! these types, never the other way round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Asset symbol
// ---------------------------------------------------------------------------

/// Ticker of a tracked asset (e.g. `BTC`), normalised to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetSymbol(String);

impl AssetSymbol {
    pub fn new(raw: &str) -> Result<Self, InvalidSymbol> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > 16
            || !trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(InvalidSymbol(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetSymbol {
    type Err = InvalidSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AssetSymbol {
    type Error = InvalidSymbol;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AssetSymbol> for String {
    fn from(value: AssetSymbol) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid asset symbol: {0:?}")]
pub struct InvalidSymbol(pub String);

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One price observation for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub asset: AssetSymbol,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl Sample {
    pub fn new(asset: AssetSymbol, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { asset, timestamp, price }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} = {}", self.asset, self.timestamp.to_rfc3339(), self.price)
    }
}

// ---------------------------------------------------------------------------
// Derived statistics
// ---------------------------------------------------------------------------

/// Rolling statistics for one asset at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub timestamp: DateTime<Utc>,
    pub asset: AssetSymbol,
    pub current_price: f64,
    /// Change vs. the previous sample, in percent.
    pub price_change_pct: f64,
    /// Change vs. the earliest sample of the 24h window, in percent.
    /// `0.0` when the window holds no qualifying sample.
    pub price_change_24h_pct: f64,
    /// Sample standard deviation of the most recent prices.
    pub volume_window_stddev: f64,
    pub high_24h: f64,
    pub low_24h: f64,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// A threshold crossing between two adjacent samples.
///
/// Identity is `(asset, previous_timestamp, timestamp, subscriber)`; the
/// store keeps at most one row per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Timestamp of the later sample.
    pub timestamp: DateTime<Utc>,
    /// Timestamp of the earlier sample.
    pub previous_timestamp: DateTime<Utc>,
    pub asset: AssetSymbol,
    pub start_price: f64,
    pub end_price: f64,
    pub price_change_pct: f64,
    /// Elapsed time between the two samples, `H:MM:SS` or `N days, H:MM:SS`.
    pub time_interval: String,
    /// `None` for the global threshold, otherwise the subscription owner.
    pub subscriber: Option<String>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({:+.2}%) over {}",
            self.asset, self.start_price, self.end_price, self.price_change_pct, self.time_interval,
        )?;
        if let Some(ref who) = self.subscriber {
            write!(f, " [{who}]")?;
        }
        Ok(())
    }
}

/// A per-subscriber alert rule. Read-only input to the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: String,
    pub asset: AssetSymbol,
    pub threshold_pct: f64,
    pub window_minutes: u32,
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Outcome of one pipeline tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub samples_ingested: usize,
    pub stats_computed: usize,
    /// Alerts newly persisted this tick (re-detected crossings excluded).
    pub alerts_raised: usize,
    pub errors: Vec<TickError>,
}

impl TickReport {
    pub fn new(tick_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            tick_id,
            timestamp,
            samples_ingested: 0,
            stats_computed: 0,
            alerts_raised: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick {}: samples={} stats={} alerts={} errors={}",
            self.tick_id,
            self.samples_ingested,
            self.stats_computed,
            self.alerts_raised,
            self.errors.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Non-fatal conditions recorded on a [`TickReport`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    #[error("Price source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("No price for {asset} in provider response")]
    MissingAssetPrice { asset: AssetSymbol },

    #[error("Rejected price {price} for {asset}")]
    InvalidAssetPrice { asset: AssetSymbol, price: f64 },

    #[error("Invalid baseline price {price} for {asset} at {at}")]
    InvalidBaselinePrice {
        asset: AssetSymbol,
        price: f64,
        at: DateTime<Utc>,
    },

    #[error("Notification failed: {0}")]
    Dispatch(String),
}

/// Failure of the upstream price provider.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable payload: {0}")]
    Decode(String),
}

/// Statistics that cannot be derived from a window.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("Invalid baseline price {price} for {asset} at {at}")]
    InvalidBaselinePrice {
        asset: AssetSymbol,
        price: f64,
        at: DateTime<Utc>,
    },
}

impl From<StatsError> for TickError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::InvalidBaselinePrice { asset, price, at } => {
                TickError::InvalidBaselinePrice { asset, price, at }
            }
        }
    }
}

/// Store read/write failure. Fatal to the tick that hits it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Notification channel failure. Logged, never escalated.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification endpoint not configured")]
    NotConfigured,

    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A tick whose writes were rolled back.
#[derive(Debug, thiserror::Error)]
#[error("Tick {tick_id} failed and was rolled back: {source}")]
pub struct TickFailure {
    pub tick_id: Uuid,
    pub source: StoreError,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
