use crate::core::error::{EngineError, Result};
use crate::core::price::{PriceHistoryProvider, PricePoint, PriceSeries};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

enum Source {
    Directory(PathBuf),
    Memory(HashMap<String, PriceSeries>),
}

/// Recorded price history, read from `<TICKER>.json` files or held in memory.
///
/// Each file is a JSON array of `{"date": "YYYY-MM-DD", "close": f64}`.
pub struct FixtureHistoryProvider {
    source: Source,
}

impl FixtureHistoryProvider {
    pub fn from_dir(path: impl Into<PathBuf>) -> Self {
        FixtureHistoryProvider {
            source: Source::Directory(path.into()),
        }
    }

    pub fn from_series(series: impl IntoIterator<Item = PriceSeries>) -> Self {
        FixtureHistoryProvider {
            source: Source::Memory(
                series
                    .into_iter()
                    .map(|s| (s.ticker.to_uppercase(), s))
                    .collect(),
            ),
        }
    }

    async fn load(&self, ticker: &str) -> Result<PriceSeries> {
        match &self.source {
            Source::Memory(series) => series
                .get(&ticker.to_uppercase())
                .cloned()
                .ok_or_else(|| EngineError::insufficient(ticker, "no price history available")),
            Source::Directory(dir) => {
                let file = dir.join(format!("{ticker}.json"));
                debug!("Reading fixture {}", file.display());
                let text = match tokio::fs::read_to_string(&file).await {
                    Ok(text) => text,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(EngineError::insufficient(
                            ticker,
                            "no price history available",
                        ));
                    }
                    Err(e) => {
                        return Err(EngineError::upstream(
                            ticker,
                            format!("Failed to read {}: {e}", file.display()),
                        ));
                    }
                };
                let points: Vec<PricePoint> = serde_json::from_str(&text).map_err(|e| {
                    EngineError::upstream(
                        ticker,
                        format!("Failed to parse {}: {e}", file.display()),
                    )
                })?;
                Ok(PriceSeries::new(ticker, points))
            }
        }
    }
}

#[async_trait]
impl PriceHistoryProvider for FixtureHistoryProvider {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let series = self.load(ticker).await?.within(start, end);
        if series.is_empty() {
            return Err(EngineError::insufficient(
                ticker,
                format!("no prices between {start} and {end}"),
            ));
        }
        Ok(series)
    }
}
