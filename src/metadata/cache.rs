use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::api::MediaInfo;
use crate::errors::Result;
use crate::metadata::CatalogProvider;

/// Cache entry for a resolved catalog
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Catalogs keyed by source reference, so preview and download share one lookup.
pub struct MetadataCache {
    cache: Arc<RwLock<HashMap<String, CacheEntry<MediaInfo>>>>,
    default_ttl: Duration,
}

impl MetadataCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<MediaInfo> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.data.clone())
    }

    pub async fn set(&self, key: String, value: MediaInfo) {
        let entry = CacheEntry::new(value, self.default_ttl);
        let mut cache = self.cache.write().await;
        cache.insert(key, entry);
    }

    pub async fn clear_expired(&self) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| !entry.is_expired());
    }

    pub async fn size(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }
}

/// Wraps a provider with a [`MetadataCache`].
pub struct CachedProvider<P> {
    inner: P,
    cache: MetadataCache,
}

impl<P: CatalogProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            cache: MetadataCache::new(ttl),
        }
    }
}

#[async_trait]
impl<P: CatalogProvider> CatalogProvider for CachedProvider<P> {
    async fn fetch(&self, source_ref: &str, timeout: Duration) -> Result<MediaInfo> {
        if let Some(cached) = self.cache.get(source_ref).await {
            log::info!("💾 [CATALOG] Using cached catalog for {}", source_ref);
            return Ok(cached);
        }
        self.cache.clear_expired().await;

        let info = self.inner.fetch(source_ref, timeout).await?;
        self.cache.set(source_ref.to_string(), info.clone()).await;
        Ok(info)
    }
}
