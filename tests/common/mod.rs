//! Deterministic fakes for integration testing.
//!
//! A scriptable price source and a recording notifier, both in-memory
//! with no network access. State lives behind `Arc<Mutex<..>>` so test
//! code keeps a handle after the fake is boxed into a pipeline.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use volwatch::clock::ManualClock;
use volwatch::engine::{Pipeline, PipelineSettings};
use volwatch::notify::Notifier;
use volwatch::source::PriceSource;
use volwatch::storage::{StoreTransaction, TimeSeriesStore};
use volwatch::types::{AssetSymbol, DispatchError, SourceError, StoreError};

pub fn sym(s: &str) -> AssetSymbol {
    AssetSymbol::new(s).unwrap()
}

pub fn symbols(list: &[&str]) -> BTreeSet<AssetSymbol> {
    list.iter().copied().map(sym).collect()
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn clock() -> ManualClock {
    ManualClock::new(t0())
}

// ---------------------------------------------------------------------------
// Price source
// ---------------------------------------------------------------------------

/// Replays one scripted price map per fetch. Once the script runs out
/// the last map is repeated.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<VecDeque<HashMap<AssetSymbol, f64>>>>,
    last: Arc<Mutex<HashMap<AssetSymbol, f64>>>,
    /// If set, every fetch fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one tick's prices.
    pub fn push(&self, prices: &[(&str, f64)]) -> &Self {
        let map = prices.iter().map(|(s, p)| (sym(s), *p)).collect();
        self.script.lock().unwrap().push_back(map);
        self
    }

    /// Queue one tick per price for a single asset.
    pub fn push_series(&self, asset: &str, prices: &[f64]) -> &Self {
        for &p in prices {
            self.push(&[(asset, p)]);
        }
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn fetch(
        &self,
        _assets: &BTreeSet<AssetSymbol>,
    ) -> Result<HashMap<AssetSymbol, f64>, SourceError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(ref msg) = *self.force_error.lock().unwrap() {
            return Err(SourceError::Transport(msg.clone()));
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every message; optionally fails instead.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let n = Self::default();
        n.set_failing(true);
        n
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), DispatchError> {
        if *self.fail.lock().unwrap() {
            return Err(DispatchError::Rejected { status: 500, body: "webhook down".into() });
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Hands control back to the scheduler right after a transaction opens,
/// so ticks driven concurrently interleave between begin and commit.
pub struct YieldingStore<S>(pub S);

#[async_trait]
impl<S: TimeSeriesStore> TimeSeriesStore for YieldingStore<S> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.0.begin().await?;
        tokio::task::yield_now().await;
        Ok(tx)
    }

    async fn close(&self) {
        self.0.close().await;
    }

    fn backend(&self) -> &'static str {
        self.0.backend()
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn pipeline<S>(
    source: &ScriptedSource,
    store: S,
    notifier: &RecordingNotifier,
    settings: PipelineSettings,
) -> Pipeline
where
    S: TimeSeriesStore + 'static,
{
    Pipeline::new(
        Box::new(source.clone()),
        Box::new(store),
        Box::new(notifier.clone()),
        settings,
    )
}
