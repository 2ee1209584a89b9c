//! Price sources.
//!
//! Defines the `PriceSource` trait and the CoinGecko implementation used
//! in production.

pub mod coingecko;

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

use crate::types::{AssetSymbol, SourceError};

/// Abstraction over market-data providers.
///
/// One call per tick. Assets the provider has no price for are simply
/// absent from the returned map; transport or protocol failures fail the
/// whole call. Implementations never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(
        &self,
        assets: &BTreeSet<AssetSymbol>,
    ) -> Result<HashMap<AssetSymbol, f64>, SourceError>;
}
