use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use base64::Engine as _;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};

use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

/// Whether a request carries the page's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Include,
    Omit,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Accepted content-type prefixes. Responses without the header pass.
    pub allowed_content_types: Vec<String>,
    /// Cookie header sent with credentialed requests.
    pub cookie_header: Option<String>,
    pub referer: Option<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 25 * 1024 * 1024,
            allowed_content_types: vec!["image/".to_string(), "application/octet-stream".to_string()],
            cookie_header: None,
            referer: None,
        }
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: CredentialMode) -> Result<FetchOutput, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn build_client(&self, redirect_counter: Arc<AtomicUsize>) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(policy)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| ct.starts_with(&allowed.to_ascii_lowercase()))
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, mode: CredentialMode) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::new(
                FailureKind::UnsupportedScheme,
                format!("cannot fetch {} urls", parsed.scheme()),
            ));
        }
        let redirect_counter = Arc::new(AtomicUsize::new(0));
        let client = self.build_client(redirect_counter.clone())?;

        let mut request = client.get(parsed.clone());
        if mode == CredentialMode::Include {
            if let Some(cookie) = self.settings.cookie_header.as_deref() {
                request = request.header(COOKIE, cookie);
            }
            if let Some(referer) = self.settings.referer.as_deref() {
                request = request.header(REFERER, referer);
            }
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                format!("HTTP {} for {url}", status.as_u16()),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            redirect_count: redirect_counter.load(Ordering::Relaxed),
            content_type,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput { bytes, metadata })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

/// `data:{mime};base64,...` for a fetched body.
pub fn to_data_url(output: &FetchOutput) -> String {
    let mime = output
        .metadata
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or("application/octet-stream");
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&output.bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(content_type: Option<&str>) -> FetchOutput {
        FetchOutput {
            bytes: b"abc".to_vec(),
            metadata: FetchMetadata {
                original_url: "https://x/a".into(),
                final_url: "https://x/a".into(),
                redirect_count: 0,
                content_type: content_type.map(str::to_string),
                byte_len: 3,
            },
        }
    }

    #[test]
    fn data_url_falls_back_to_octet_stream() {
        assert_eq!(to_data_url(&output(Some("image/png"))), "data:image/png;base64,YWJj");
        assert_eq!(to_data_url(&output(None)), "data:application/octet-stream;base64,YWJj");
    }

    #[test]
    fn content_types_match_by_prefix() {
        let fetcher = ReqwestFetcher::new(FetchSettings::default());
        assert!(fetcher.is_content_type_allowed("image/webp; q=1"));
        assert!(fetcher.is_content_type_allowed("Image/PNG"));
        assert!(!fetcher.is_content_type_allowed("text/html"));
    }
}
