use crate::core::config::YahooProviderConfig;
use crate::core::error::{EngineError, Result};
use crate::core::price::{PriceHistoryProvider, PricePoint, PriceSeries};
use crate::providers::util::{transport_error, with_retry};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::{debug, instrument};

/// Daily history from the Yahoo Finance chart API.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    backoff_ms: u64,
}

impl YahooFinanceProvider {
    pub fn new(config: &YahooProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("glassbox/1.0")
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(YahooFinanceProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            retries: config.retries,
            backoff_ms: config.backoff_ms,
        })
    }

    async fn request(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        let period1 = day_start_timestamp(start);
        let period2 = day_start_timestamp(end + Duration::days(1));
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=div%2Csplit",
            self.base_url, ticker, period1, period2
        );
        debug!("Requesting price history from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(ticker, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::insufficient(
                ticker,
                "no price history available (unknown symbol)",
            ));
        }
        // 429 and 5xx land here and are retried by `with_retry`
        if !status.is_success() {
            return Err(EngineError::upstream(ticker, format!("HTTP error: {status}")));
        }

        let text = response.text().await.map_err(|e| transport_error(ticker, e))?;
        let data: YahooChartResponse = serde_json::from_str(&text).map_err(|e| {
            EngineError::upstream(ticker, format!("Failed to parse JSON response: {e}"))
        })?;

        let item = data
            .chart
            .result
            .and_then(|result| result.into_iter().next())
            .ok_or_else(|| EngineError::insufficient(ticker, "no price history available"))?;

        let series = PriceSeries::new(ticker, extract_points(&item)).within(start, end);
        if series.is_empty() {
            return Err(EngineError::insufficient(
                ticker,
                format!("no prices between {start} and {end}"),
            ));
        }
        Ok(series)
    }
}

fn day_start_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
        .unwrap_or_default()
}

/// Pairs timestamps with adjusted closes, falling back to raw closes when the
/// adjusted series is absent.
fn extract_points(item: &ChartItem) -> Vec<PricePoint> {
    let Some(timestamps) = item.timestamp.as_ref() else {
        return Vec::new();
    };
    let Some(indicators) = item.indicators.as_ref() else {
        return Vec::new();
    };
    let closes = indicators
        .adjclose
        .as_ref()
        .and_then(|adj| adj.first())
        .and_then(|adj| adj.adjclose.as_ref())
        .or_else(|| indicators.quote.first().and_then(|q| q.close.as_ref()));
    let Some(closes) = closes else {
        return Vec::new();
    };

    timestamps
        .iter()
        .zip(closes.iter())
        .filter_map(|(ts, close)| {
            let date = Utc.timestamp_opt(*ts, 0).single()?.date_naive();
            close.map(|close| PricePoint { date, close })
        })
        .collect()
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct AdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

#[async_trait]
impl PriceHistoryProvider for YahooFinanceProvider {
    #[instrument(
        name = "YahooHistoryFetch",
        skip(self),
        fields(ticker = %ticker)
    )]
    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        with_retry(
            || self.request(ticker, start, end),
            self.retries,
            self.backoff_ms,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> YahooProviderConfig {
        YahooProviderConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            retries: 2,
            backoff_ms: 1,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn market_open(s: &str) -> i64 {
        day_start_timestamp(date(s)) + 14 * 3600 + 30 * 60
    }

    pub async fn create_mock_server(ticker: &str, mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        let request_path = format!("/v8/finance/chart/{ticker}");

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    #[tokio::test]
    async fn test_successful_history_fetch_prefers_adjclose() {
        let mock_response = format!(
            r#"{{
                "chart": {{
                    "result": [{{
                        "meta": {{ "currency": "USD", "symbol": "AAPL" }},
                        "timestamp": [{}, {}, {}],
                        "indicators": {{
                            "quote": [{{ "close": [130.0, 126.0, 127.0] }}],
                            "adjclose": [{{ "adjclose": [129.0, null, 126.5] }}]
                        }}
                    }}],
                    "error": null
                }}
            }}"#,
            market_open("2023-01-03"),
            market_open("2023-01-04"),
            market_open("2023-01-05"),
        );

        let mock_server = create_mock_server("AAPL", &mock_response).await;
        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();
        let series = provider
            .fetch_history("AAPL", date("2023-01-01"), date("2023-01-31"))
            .await
            .unwrap();

        assert_eq!(series.ticker, "AAPL");
        assert_eq!(series.len(), 2);
        assert_eq!(series.points[0].date, date("2023-01-03"));
        assert_eq!(series.points[0].close, 129.0);
        assert_eq!(series.close_on(date("2023-01-05")), Some(126.5));
    }

    #[tokio::test]
    async fn test_sends_period_bounds() {
        let mock_server = MockServer::start().await;
        let mock_response = format!(
            r#"{{"chart": {{"result": [{{
                "timestamp": [{}],
                "indicators": {{ "quote": [{{ "close": [250.0] }}] }}
            }}]}}}}"#,
            market_open("2024-03-01")
        );
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/MSFT"))
            .and(query_param(
                "period1",
                day_start_timestamp(date("2024-03-01")).to_string(),
            ))
            .and(query_param(
                "period2",
                day_start_timestamp(date("2024-03-02")).to_string(),
            ))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();
        let series = provider
            .fetch_history("MSFT", date("2024-03-01"), date("2024-03-01"))
            .await
            .unwrap();
        assert_eq!(series.last_close(), Some(250.0));
    }

    #[tokio::test]
    async fn test_empty_result_is_insufficient_data() {
        let mock_server = create_mock_server("NEWCO", r#"{"chart": {"result": []}}"#).await;
        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();

        let err = provider
            .fetch_history("NEWCO", date("2023-01-01"), date("2023-12-31"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInsufficient);
        assert_eq!(
            err.to_string(),
            "insufficient price history for NEWCO: no price history available"
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();
        let err = provider
            .fetch_history("ZZZZ", date("2023-01-01"), date("2023-12-31"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInsufficient);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();
        let err = provider
            .fetch_history("AAPL", date("2023-01-01"), date("2023-12-31"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "price data provider error for AAPL: HTTP error: 503 Service Unavailable"
        );
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = create_mock_server("AAPL", r#"{"charts": {}}"#).await;
        let provider = YahooFinanceProvider::new(&test_config(&mock_server.uri())).unwrap();

        let err = provider
            .fetch_history("AAPL", date("2023-01-01"), date("2023-12-31"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamDataProvider);
        assert!(err.to_string().contains("Failed to parse JSON response"));
    }
}
