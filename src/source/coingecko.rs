//! CoinGecko price source.
//!
//! API: `GET {base}/simple/price?ids=bitcoin,ethereum&vs_currencies=usd`
//! Auth: optional demo/pro key passed as a request header.
//! Response: `{"bitcoin": {"usd": 64000.1}, "ethereum": {"usd": 3100.5}}`.
//! Coins the provider does not know are omitted from the response.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

use super::PriceSource;
use crate::config::{AssetConfig, SourceConfig};
use crate::types::{AssetSymbol, SourceError};

type SimplePriceResponse = HashMap<String, HashMap<String, Value>>;

/// CoinGecko `simple/price` client.
pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
    quote_currency: String,
    /// Symbol → CoinGecko coin id.
    ids: HashMap<AssetSymbol, String>,
    api_key: Option<(String, SecretString)>,
}

impl CoinGeckoClient {
    pub fn new(
        cfg: &SourceConfig,
        assets: &[AssetConfig],
        api_key: Option<SecretString>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("VOLWATCH/0.1.0")
            .build()
            .context("Failed to build HTTP client for CoinGecko")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            quote_currency: cfg.quote_currency.to_lowercase(),
            ids: assets
                .iter()
                .map(|a| (a.symbol.clone(), a.provider_id.clone()))
                .collect(),
            api_key: api_key.map(|k| (cfg.api_key_header.clone(), k)),
        })
    }

    /// Build the request URL for the given coin ids.
    fn price_url(&self, ids: &[&str]) -> String {
        let joined = ids.join(",");
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url,
            urlencoding::encode(&joined),
            urlencoding::encode(&self.quote_currency),
        )
    }

    /// Map a decoded response back onto symbols.
    ///
    /// Entries without a numeric quote are dropped, which the ingestor
    /// reports as a missing price for that asset.
    fn map_response(
        &self,
        assets: &BTreeSet<AssetSymbol>,
        body: &SimplePriceResponse,
    ) -> HashMap<AssetSymbol, f64> {
        let mut prices = HashMap::with_capacity(assets.len());
        for asset in assets {
            let Some(id) = self.ids.get(asset) else {
                continue;
            };
            let quote = body
                .get(id)
                .and_then(|quotes| quotes.get(&self.quote_currency))
                .and_then(Value::as_f64);
            match quote {
                Some(price) => {
                    prices.insert(asset.clone(), price);
                }
                None => debug!(asset = %asset, coin = %id, "No quote in CoinGecko payload"),
            }
        }
        prices
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn fetch(
        &self,
        assets: &BTreeSet<AssetSymbol>,
    ) -> Result<HashMap<AssetSymbol, f64>, SourceError> {
        let ids: Vec<&str> = assets
            .iter()
            .filter_map(|a| {
                let id = self.ids.get(a);
                if id.is_none() {
                    warn!(asset = %a, "Asset has no CoinGecko id");
                }
                id.map(String::as_str)
            })
            .collect();

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.price_url(&ids);
        debug!(url = %url, "Fetching CoinGecko prices");

        let mut req = self.http.get(&url);
        if let Some((ref header, ref key)) = self.api_key {
            req = req.header(header.as_str(), key.expose_secret().as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let body: SimplePriceResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(self.map_response(assets, &body))
    }
}
