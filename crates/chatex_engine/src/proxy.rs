//! Background image proxy: fetches an absolute URL without the page's
//! credentials and hands back embeddable data.

use std::sync::Arc;

use thiserror::Error;

use crate::fetch::{to_data_url, CredentialMode, Fetcher};
use crate::FetchError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy unavailable")]
    Unavailable,
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait::async_trait]
pub trait ImageProxy: Send + Sync {
    async fn fetch_data_url(&self, url: &str) -> Result<String, ProxyError>;
}

/// Proxy backed by a [`Fetcher`] running outside the page context.
pub struct FetcherProxy {
    fetcher: Arc<dyn Fetcher>,
}

impl FetcherProxy {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl ImageProxy for FetcherProxy {
    async fn fetch_data_url(&self, url: &str) -> Result<String, ProxyError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ProxyError::Unavailable);
        }
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("data:") {
            return Ok(url.to_string());
        }
        if !(lower.starts_with("http:") || lower.starts_with("https:")) {
            return Err(ProxyError::UnsupportedScheme(url.to_string()));
        }
        let output = self.fetcher.fetch(url, CredentialMode::Omit).await?;
        Ok(to_data_url(&output))
    }
}

/// For hosts that have no background context.
pub struct NoProxy;

#[async_trait::async_trait]
impl ImageProxy for NoProxy {
    async fn fetch_data_url(&self, _url: &str) -> Result<String, ProxyError> {
        Err(ProxyError::Unavailable)
    }
}
