use crate::core::cache::Cache;
use crate::core::error::Result;
use crate::core::price::{PriceHistoryProvider, PriceSeries};
use crate::store::memory::MemoryCache;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Read-through cache in front of another provider.
///
/// Only successful fetches are cached, and every entry expires after `ttl`.
/// Expired entries are purged on every miss.
pub struct CachingHistoryProvider {
    inner: Arc<dyn PriceHistoryProvider>,
    cache: Arc<dyn Cache<HistoryKey, PriceSeries>>,
    ttl: Duration,
}

impl CachingHistoryProvider {
    pub fn new(inner: Arc<dyn PriceHistoryProvider>, ttl: Duration) -> Self {
        Self::with_cache(
            inner,
            Arc::new(MemoryCache::<HistoryKey, PriceSeries>::new()),
            ttl,
        )
    }

    pub fn with_cache(
        inner: Arc<dyn PriceHistoryProvider>,
        cache: Arc<dyn Cache<HistoryKey, PriceSeries>>,
        ttl: Duration,
    ) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl PriceHistoryProvider for CachingHistoryProvider {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let key = HistoryKey {
            ticker: ticker.to_string(),
            start,
            end,
        };
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for price history: {}", ticker);
            return Ok(cached);
        }
        debug!("Cache miss for price history: {}", ticker);
        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!("Purged {} expired price histories", purged);
        }
        let series = self.inner.fetch_history(ticker, start, end).await?;
        self.cache.put(key, series.clone(), Some(self.ttl)).await;
        Ok(series)
    }
}
