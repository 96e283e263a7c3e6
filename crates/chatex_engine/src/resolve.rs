//! Image resolution: replaces remote image references with embeddable data.
//!
//! Each distinct URL is tried against the shared cache, then a credentialed
//! fetch, then the background proxy, then an uncredentialed fetch. At most
//! four URLs are in flight at once. Nothing here fails: an image that cannot
//! be loaded keeps its placeholder.

use std::collections::HashMap;
use std::sync::Arc;

use chatex_logging::{chatex_debug, chatex_warn};
use futures_util::stream::{self, StreamExt};
use url::Url;

use crate::cache::ImageCache;
use crate::dom::normalize_url;
use crate::fetch::{to_data_url, CredentialMode, Fetcher};
use crate::fragment::escape_attr;
use crate::markdown::image_token;
use crate::proxy::ImageProxy;
use crate::Turn;

pub const MAX_CONCURRENT_IMAGE_FETCHES: usize = 4;

/// Favicon service thumbnails are never inlined.
pub fn should_skip_inlining(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    if lower.is_empty() || lower.starts_with("data:") || lower.starts_with("blob:") {
        return false;
    }
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    (host == "www.google.com" || host.ends_with(".google.com")) && parsed.path().starts_with("/s2/favicons")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ImageResolver {
    fetcher: Arc<dyn Fetcher>,
    proxy: Arc<dyn ImageProxy>,
    cache: Arc<ImageCache>,
    base: Url,
}

impl ImageResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, proxy: Arc<dyn ImageProxy>, cache: Arc<ImageCache>, base: Url) -> Self {
        Self {
            fetcher,
            proxy,
            cache,
            base,
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Embeddable data for one image reference, or `None` once every tier failed.
    pub async fn fetch_data_url(&self, src: &str) -> Option<String> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        if src.to_ascii_lowercase().starts_with("data:") {
            return Some(src.to_string());
        }
        if let Some(hit) = self.cache.get(src) {
            return Some(hit);
        }
        let normalized = normalize_url(&self.base, src);
        if should_skip_inlining(&normalized) {
            return None;
        }
        if let Some(hit) = self.cache.get(&normalized) {
            return Some(hit);
        }
        if normalized.to_ascii_lowercase().starts_with("blob:") {
            chatex_debug!("Blob image {} is not readable outside the page", normalized);
            return None;
        }

        let data = self.fetch_tiers(&normalized).await?;
        self.cache.insert(src, &normalized, &data);
        Some(data)
    }

    async fn fetch_tiers(&self, url: &str) -> Option<String> {
        match self.fetcher.fetch(url, CredentialMode::Include).await {
            Ok(output) => return Some(to_data_url(&output)),
            Err(err) => chatex_debug!("Credentialed image fetch failed for {}: {}", url, err),
        }
        match self.proxy.fetch_data_url(url).await {
            Ok(data) if !data.is_empty() => return Some(data),
            Ok(_) => chatex_debug!("Proxy returned no data for {}", url),
            Err(err) => chatex_debug!("Proxy image fetch failed for {}: {}", url, err),
        }
        match self.fetcher.fetch(url, CredentialMode::Omit).await {
            Ok(output) => Some(to_data_url(&output)),
            Err(err) => {
                chatex_debug!("Uncredentialed image fetch failed for {}: {}", url, err);
                None
            }
        }
    }

    /// Resolves many URLs through the bounded pool. Failed URLs are absent
    /// from the result.
    pub async fn resolve_urls(&self, urls: Vec<String>) -> HashMap<String, String> {
        let results: Vec<(String, Option<String>)> = stream::iter(urls)
            .map(|url| async move {
                let data = self.fetch_data_url(&url).await;
                (url, data)
            })
            .buffer_unordered(MAX_CONCURRENT_IMAGE_FETCHES)
            .collect()
            .await;
        let mut out = HashMap::new();
        for (url, data) in results {
            match data {
                Some(data) => {
                    out.insert(url, data);
                }
                None => chatex_warn!("Image load failed {}", url),
            }
        }
        out
    }

    /// Fills `data_url` on every descriptor and rewrites each turn's
    /// `markdown_resolved` and `html` to embed the data.
    pub async fn resolve_turns(&self, turns: &mut [Turn]) -> ResolveReport {
        let mut order: Vec<String> = Vec::new();
        let mut jobs: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (t, turn) in turns.iter().enumerate() {
            for (i, img) in turn.images.iter().enumerate() {
                if img.data_url.is_some() || img.src.is_empty() {
                    continue;
                }
                let normalized = normalize_url(&self.base, &img.src);
                let key = if normalized.is_empty() { img.src.clone() } else { normalized };
                if should_skip_inlining(&key) {
                    continue;
                }
                jobs.entry(key.clone())
                    .or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    })
                    .push((t, i));
            }
        }

        let total = order.len();
        let resolved = self.resolve_urls(order).await;
        for (key, data) in &resolved {
            for (t, i) in jobs.get(key).into_iter().flatten() {
                turns[*t].images[*i].data_url = Some(data.clone());
            }
        }

        for turn in turns.iter_mut() {
            substitute_images(turn);
        }

        ResolveReport {
            resolved: resolved.len(),
            failed: total - resolved.len(),
        }
    }
}

fn substitute_images(turn: &mut Turn) {
    for img in &turn.images {
        let Some(data) = img.data_url.as_deref() else {
            continue;
        };
        if let Some(index) = img.index {
            turn.markdown_resolved = turn.markdown_resolved.replace(&image_token(index), data);
        }
        if !img.src.is_empty() {
            let needle = format!("src=\"{}\"", escape_attr(&img.src));
            turn.html = turn.html.replace(&needle, &format!("src=\"{data}\""));
        }
    }
}
