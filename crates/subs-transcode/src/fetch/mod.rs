//! Upstream fetch with disk-backed cache and fallback-on-failure.
//!
//! 获取顺序：新鲜缓存 -> 上游 -> 任意年龄的缓存 -> UpstreamUnavailable

pub mod store;
pub mod upstream;

pub use store::{CacheEntry, CacheStore, FsCacheStore, HeaderSubset, MemoryCacheStore};
pub use upstream::{filter_headers, ReqwestUpstream, UpstreamClient, UpstreamResponse};

use crate::document::{self, DocumentShape};
use crate::error::{CacheError, TranscodeError, UpstreamError};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Where a returned document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Fetched and validated just now.
    Upstream,
    /// Cache entry younger than the freshness window.
    FreshCache,
    /// Upstream failed; stale cache served instead.
    Fallback,
}

impl FetchOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::FreshCache => "fresh_cache",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub text: String,
    pub headers: HeaderSubset,
    pub origin: FetchOrigin,
}

impl FetchedDocument {
    fn from_entry(entry: CacheEntry, origin: FetchOrigin) -> Self {
        Self {
            text: entry.text,
            headers: entry.headers,
            origin,
        }
    }
}

/// Owns the cache entries of every source key.
#[derive(Clone)]
pub struct Fetcher {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<dyn CacheStore>,
    forward_headers: Vec<String>,
}

impl Fetcher {
    pub fn new(upstream: Arc<dyn UpstreamClient>, store: Arc<dyn CacheStore>, forward_headers: Vec<String>) -> Self {
        Self {
            upstream,
            store,
            forward_headers,
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the document for `source_key`.
    ///
    /// Only "upstream failed and nothing cached" is an error. Network,
    /// status and shape failures fall back to the last cached copy of any
    /// age.
    pub async fn fetch_document(
        &self,
        source_key: &str,
        url: &str,
        shape: DocumentShape,
        force_refresh: bool,
        freshness: Duration,
    ) -> Result<FetchedDocument, TranscodeError> {
        store::validate_key(source_key)?;
        let cached = self.load_cached(source_key);

        if !force_refresh {
            if let Some(entry) = &cached {
                let age = entry.age(SystemTime::now());
                if age < freshness {
                    info!(source = source_key, age_secs = age.as_secs(), "serving fresh cache");
                    return Ok(FetchedDocument::from_entry(entry.clone(), FetchOrigin::FreshCache));
                }
            }
        }

        match self.fetch_upstream(url, shape).await {
            Ok(entry) => {
                info!(source = source_key, bytes = entry.text.len(), "fetched upstream document");
                if let Err(error) = self.store.store(source_key, &entry) {
                    warn!(source = source_key, %error, "failed to persist cache entry");
                }
                Ok(FetchedDocument::from_entry(entry, FetchOrigin::Upstream))
            }
            Err(error) => match cached {
                Some(entry) => {
                    warn!(
                        source = source_key,
                        %error,
                        age_secs = entry.age(SystemTime::now()).as_secs(),
                        "upstream failed, serving cached copy"
                    );
                    Ok(FetchedDocument::from_entry(entry, FetchOrigin::Fallback))
                }
                None => Err(TranscodeError::UpstreamUnavailable {
                    source_key: source_key.to_string(),
                    reason: error.to_string(),
                }),
            },
        }
    }

    async fn fetch_upstream(&self, url: &str, shape: DocumentShape) -> Result<CacheEntry, UpstreamError> {
        let resp = self.upstream.get(url).await?;
        if !resp.is_success() {
            return Err(UpstreamError::Status(resp.status));
        }
        document::validate(&resp.body, shape)?;
        let headers = filter_headers(&resp.headers, &self.forward_headers);
        Ok(CacheEntry::new(resp.body, headers))
    }

    /// Unreadable entries count as absent.
    fn load_cached(&self, key: &str) -> Option<CacheEntry> {
        match self.store.load(key) {
            Ok(entry) => entry,
            Err(CacheError::InvalidKey(_)) => None,
            Err(error) => {
                warn!(source = key, %error, "cache entry unreadable, ignoring");
                None
            }
        }
    }
}
