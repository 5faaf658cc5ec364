//! Remote symbol source backed by the stock API (`GET {base}/api/v1/stocks`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::DEFAULT_VOLUME;
use crate::application::ports::{SourceError, SymbolSource};
use crate::domain::tick::Ticker;

#[derive(Debug, Deserialize)]
struct StocksResponse {
    stocks: Vec<StockEntry>,
}

#[derive(Debug, Deserialize)]
struct StockEntry {
    symbol: String,
    #[serde(default, alias = "price")]
    latest_price: Option<f64>,
    #[serde(default)]
    volume: Option<u64>,
}

/// [`SymbolSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSymbolSource {
    client: Client,
    base_url: String,
}

impl HttpSymbolSource {
    /// Create a source for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self) -> Result<Vec<StockEntry>, SourceError> {
        let url = format!("{}/api/v1/stocks", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: StocksResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(parsed.stocks)
    }
}

#[async_trait]
impl SymbolSource for HttpSymbolSource {
    async fn symbol_count(&self) -> Result<usize, SourceError> {
        Ok(self.fetch().await?.len())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, SourceError> {
        let mut symbols: Vec<String> = self.fetch().await?.into_iter().map(|e| e.symbol).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    async fn tickers(&self) -> Result<Vec<Ticker>, SourceError> {
        Ok(self
            .fetch()
            .await?
            .into_iter()
            .filter_map(|e| {
                let price = e.latest_price.filter(|p| p.is_finite() && *p > 0.0)?;
                Some(Ticker::new(e.symbol, price, e.volume.unwrap_or(DEFAULT_VOLUME)))
            })
            .collect())
    }
}
