//! Client for the ERP that owns the authoritative catalog and pricing.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Error)]
pub enum ErpError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("erp rejected credentials")]
    Unauthorized,
    #[error("json error: {0}")]
    Serde(String),
    #[error("invalid url: {0}")]
    Url(String),
}

impl ErpError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A product as the ERP reports it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErpProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub stock: i64,
}

/// One page of the ERP product listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpPage {
    pub items: Vec<ErpProduct>,
    pub total: u64,
}

/// Source of ERP catalog pages; the HTTP client in production, fixtures in tests
#[async_trait]
pub trait ErpSource: Send + Sync {
    /// Fetch a 1-based page of products
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<ErpPage, ErpError>;
}

#[derive(Debug)]
pub struct ErpClient {
    http: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl ErpClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(base_url: Url, api_key: Option<SecretString>) -> Result<Self, ErpError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ErpError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn products_url(&self, page: u32, page_size: u32) -> Result<Url, ErpError> {
        let mut url = products_endpoint(&self.base_url)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &page_size.to_string());
        Ok(url)
    }

    async fn send_request(&self, url: Url) -> Result<ErpPage, ErpError> {
        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let res = request.send().await.map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<ErpPage>()
                .await
                .map_err(|e| ErpError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ErpError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(ErpError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(ErpError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl ErpSource for ErpClient {
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<ErpPage, ErpError> {
        let url = self.products_url(page, page_size)?;

        (|| async { self.send_request(url.clone()).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(15))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &ErpError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    page,
                    "ERP request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }
}

/// `{base}/products`, keeping any path prefix of the base URL
fn products_endpoint(base: &Url) -> Result<Url, ErpError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("products").map_err(|e| ErpError::Url(e.to_string()))
}

fn map_reqwest_error(e: reqwest::Error) -> ErpError {
    if e.is_timeout() {
        ErpError::Timeout
    } else {
        ErpError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_url_keeps_base_path() {
        let client = ErpClient::new(Url::parse("https://erp.example.com/api/v2").unwrap(), None)
            .unwrap();
        let url = client.products_url(3, 50).unwrap();
        assert_eq!(
            url.as_str(),
            "https://erp.example.com/api/v2/products?page=3&page_size=50"
        );
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(ErpError::Timeout.should_retry());
        assert!(ErpError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!ErpError::Http { status: 404, body: String::new() }.should_retry());
        assert!(!ErpError::Unauthorized.should_retry());
    }

    #[test]
    fn page_parses_with_optional_fields_missing() {
        let page: ErpPage = serde_json::from_str(
            r#"{"items":[{"sku":"A","name":"Yerba","price":10.5,"currency":"USD"}],"total":1}"#,
        )
        .unwrap();
        assert_eq!(page.items[0].stock, 0);
        assert!(page.items[0].description.is_none());
    }
}
