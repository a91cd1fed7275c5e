pub mod caching;
pub mod fixture;
pub mod synthetic;
pub mod util;
pub mod yahoo_finance;

use crate::core::config::{AppConfig, ProviderKind};
use crate::core::price::PriceHistoryProvider;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Builds the price-history provider selected by `config.provider.kind`,
/// wrapped in the read-through cache when caching is enabled.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn PriceHistoryProvider>> {
    let provider: Arc<dyn PriceHistoryProvider> = match config.provider.kind {
        ProviderKind::Yahoo => Arc::new(
            yahoo_finance::YahooFinanceProvider::new(&config.provider.yahoo)
                .context("Failed to create Yahoo Finance provider")?,
        ),
        ProviderKind::Fixture => {
            let fixture = config
                .provider
                .fixture
                .as_ref()
                .context("provider.fixture.path is required for the fixture provider")?;
            Arc::new(fixture::FixtureHistoryProvider::from_dir(&fixture.path))
        }
        ProviderKind::Synthetic => {
            let mut provider = synthetic::SyntheticHistoryProvider::new(
                config.provider.synthetic.seed,
                &config.hedge.benchmark,
            );
            if let Some(symbol) = &config.analysis.risk_free_symbol {
                provider = provider.with_risk_free(symbol);
            }
            Arc::new(provider)
        }
    };
    debug!("Using {:?} price history provider", config.provider.kind);

    if config.cache.enabled {
        Ok(Arc::new(caching::CachingHistoryProvider::new(
            provider,
            config.cache.ttl(),
        )))
    } else {
        Ok(provider)
    }
}
