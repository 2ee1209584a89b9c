//! In-memory time-series store.
//!
//! A transaction works on a private copy of the tables and publishes it on
//! commit, so an abandoned or rolled-back tick leaves no trace. Writers are
//! serialised by the pipeline's tick lock; concurrent transactions from
//! elsewhere would be last-writer-wins.
//!
//! Faults can be injected at each write point to exercise rollback paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use super::{AlertFilter, StoreTransaction, TimeSeriesStore};
use crate::types::{Alert, AssetSymbol, Sample, StatRecord, StoreError};

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    SampleWrite,
    StatWrite,
    AlertWrite,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    samples: Vec<Sample>,
    stats: Vec<StatRecord>,
    alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<HashSet<FaultPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation at `point` fail.
    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).insert(point);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Committed samples, in insertion order.
    pub fn samples(&self) -> Vec<Sample> {
        self.read(|t| t.samples.clone())
    }

    /// Committed statistics, in insertion order.
    pub fn stats(&self) -> Vec<StatRecord> {
        self.read(|t| t.stats.clone())
    }

    /// Committed alerts, in insertion order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.read(|t| t.alerts.clone())
    }

    /// Seed committed samples directly, bypassing the pipeline.
    pub fn seed_samples(&self, samples: impl IntoIterator<Item = Sample>) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .extend(samples);
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        if self.faults.lock().unwrap_or_else(PoisonError::into_inner).contains(&point) {
            return Err(StoreError::Unavailable(format!("injected fault at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.check(FaultPoint::Begin)?;
        let working = self.read(Tables::clone);
        Ok(Box::new(MemoryTransaction { store: self.clone(), working }))
    }

    async fn close(&self) {}

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    working: Tables,
}

impl MemoryTransaction {
    /// Samples for `asset` in timestamp order; ties keep insertion order.
    fn ordered_samples(&self, asset: &AssetSymbol) -> Vec<Sample> {
        let mut out: Vec<Sample> = self
            .working
            .samples
            .iter()
            .filter(|s| &s.asset == asset)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        out
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn append_sample(&mut self, sample: &Sample) -> Result<(), StoreError> {
        self.store.check(FaultPoint::SampleWrite)?;
        self.working.samples.push(sample.clone());
        Ok(())
    }

    async fn query_samples(
        &mut self,
        asset: &AssetSymbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        let mut out = self.ordered_samples(asset);
        out.retain(|s| s.timestamp >= since);
        Ok(out)
    }

    async fn query_recent(
        &mut self,
        asset: &AssetSymbol,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError> {
        let mut out = self.ordered_samples(asset);
        let skip = out.len().saturating_sub(limit);
        out.drain(..skip);
        Ok(out)
    }

    async fn append_stat(&mut self, stat: &StatRecord) -> Result<(), StoreError> {
        self.store.check(FaultPoint::StatWrite)?;
        self.working.stats.push(stat.clone());
        Ok(())
    }

    async fn append_alert(&mut self, alert: &Alert) -> Result<bool, StoreError> {
        self.store.check(FaultPoint::AlertWrite)?;
        let duplicate = self.working.alerts.iter().any(|a| {
            a.asset == alert.asset
                && a.previous_timestamp == alert.previous_timestamp
                && a.timestamp == alert.timestamp
                && a.subscriber == alert.subscriber
        });
        if duplicate {
            return Ok(false);
        }
        self.working.alerts.push(alert.clone());
        Ok(true)
    }

    async fn query_alerts(&mut self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let mut out: Vec<Alert> = self
            .working
            .alerts
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        // Stable sort keeps newest-inserted first among equal timestamps.
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(n) = filter.limit {
            out.truncate(n);
        }
        Ok(out)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.store.check(FaultPoint::Commit)?;
        *this.store.tables.lock().unwrap_or_else(PoisonError::into_inner) = this.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
