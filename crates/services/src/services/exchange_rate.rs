//! Currency conversion backed by an HTTP rate provider and an in-memory TTL cache.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Error)]
pub enum ExchangeRateError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("http {0}")]
    Http(u16),
    #[error("json error: {0}")]
    Serde(String),
    #[error("no rate from {from} to {to}")]
    UnknownPair { from: String, to: String },
    #[error("invalid url: {0}")]
    Url(String),
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `to` per one unit of `from`
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64, ExchangeRateError>;
}

#[derive(Debug, Deserialize)]
struct LatestRates {
    rates: HashMap<String, f64>,
}

/// Rate provider exposing `GET {base}/latest/{FROM}`
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    http: Client,
    base_url: Url,
}

impl HttpRateSource {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(base_url: Url) -> Result<Self, ExchangeRateError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeRateError::Transport(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    fn latest_url(&self, from: &str) -> Result<Url, ExchangeRateError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ExchangeRateError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .push("latest")
            .push(from);
        Ok(url)
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64, ExchangeRateError> {
        let res = self
            .http
            .get(self.latest_url(from)?)
            .send()
            .await
            .map_err(|e| ExchangeRateError::Transport(e.to_string()))?;

        if !res.status().is_success() {
            return Err(ExchangeRateError::Http(res.status().as_u16()));
        }

        let latest = res
            .json::<LatestRates>()
            .await
            .map_err(|e| ExchangeRateError::Serde(e.to_string()))?;

        latest
            .rates
            .get(to)
            .copied()
            .ok_or_else(|| ExchangeRateError::UnknownPair {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

#[derive(Clone)]
pub struct ExchangeRateService {
    source: Arc<dyn RateSource>,
    cache: Cache<(String, String), f64>,
}

impl ExchangeRateService {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(ttl)
            .build();
        Self { source, cache }
    }

    /// Rate from `from` to `to`, served from cache while fresh
    pub async fn rate(&self, from: &str, to: &str) -> Result<f64, ExchangeRateError> {
        let from = from.trim().to_uppercase();
        let to = to.trim().to_uppercase();
        if from == to {
            return Ok(1.0);
        }

        let source = self.source.clone();
        let key = (from.clone(), to.clone());
        self.cache
            .try_get_with(key, async move {
                debug!(from = %from, to = %to, "Fetching exchange rate");
                source.fetch_rate(&from, &to).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, ExchangeRateError> {
        Ok(round_cents(amount * self.rate(from, to).await?))
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
