use crate::core::error::{EngineError, Result};
use crate::core::price::{PriceHistoryProvider, PricePoint, PriceSeries};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const MARKET_DRIFT: f64 = 0.08;
const MARKET_VOLATILITY: f64 = 0.18;
const TRADING_DAYS: f64 = 252.0;
const CASH_YIELD: f64 = 0.045;

/// Deterministic one-factor geometric Brownian motion on weekdays.
///
/// Every ticker loads on a shared market factor; the benchmark is the factor
/// itself. The risk-free symbol, when set, is a near-riskless cash proxy.
/// The same seed and date range always give the same prices.
pub struct SyntheticHistoryProvider {
    seed: u64,
    benchmark: String,
    risk_free: Option<String>,
}

struct TickerProfile {
    beta: f64,
    drift: f64,
    idiosyncratic_vol: f64,
    initial_price: f64,
}

impl SyntheticHistoryProvider {
    pub fn new(seed: u64, benchmark: &str) -> Self {
        SyntheticHistoryProvider {
            seed,
            benchmark: benchmark.to_uppercase(),
            risk_free: None,
        }
    }

    pub fn with_risk_free(mut self, symbol: &str) -> Self {
        self.risk_free = Some(symbol.to_uppercase());
        self
    }

    fn profile(&self, ticker: &str, rng: &mut StdRng) -> TickerProfile {
        if ticker.eq_ignore_ascii_case(&self.benchmark) {
            return TickerProfile {
                beta: 1.0,
                drift: MARKET_DRIFT,
                idiosyncratic_vol: 0.0,
                initial_price: 400.0,
            };
        }
        if self
            .risk_free
            .as_deref()
            .is_some_and(|symbol| ticker.eq_ignore_ascii_case(symbol))
        {
            return TickerProfile {
                beta: 0.0,
                drift: CASH_YIELD,
                idiosyncratic_vol: 0.003,
                initial_price: 100.0,
            };
        }
        TickerProfile {
            beta: rng.gen_range(0.6..1.6),
            drift: rng.gen_range(-0.02..0.20),
            idiosyncratic_vol: rng.gen_range(0.10..0.35),
            initial_price: rng.gen_range(20.0..500.0),
        }
    }

    pub fn generate(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> PriceSeries {
        let mut market_rng = StdRng::seed_from_u64(self.seed);
        let mut ticker_rng = StdRng::seed_from_u64(self.seed ^ fnv1a(&ticker.to_uppercase()));
        let profile = self.profile(ticker, &mut ticker_rng);

        let dt = 1.0 / TRADING_DAYS;
        let market_sigma = MARKET_VOLATILITY * dt.sqrt();
        let idio_sigma = profile.idiosyncratic_vol * dt.sqrt();
        let total_var = (profile.beta * MARKET_VOLATILITY).powi(2) + profile.idiosyncratic_vol.powi(2);
        let daily_drift = (profile.drift - 0.5 * total_var) * dt;

        let mut price = profile.initial_price;
        let mut points = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            let market_shock: f64 = market_rng.sample(StandardNormal);
            let idio_shock: f64 = ticker_rng.sample(StandardNormal);
            if !points.is_empty() {
                let log_return = daily_drift
                    + profile.beta * market_sigma * market_shock
                    + idio_sigma * idio_shock;
                price *= log_return.exp();
            }
            points.push(PricePoint { date, close: price });
        }
        PriceSeries::new(ticker.to_uppercase(), points)
    }
}

/// Stable string hash so that a ticker's profile does not change between builds.
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl PriceHistoryProvider for SyntheticHistoryProvider {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let series = self.generate(ticker, start, end);
        if series.is_empty() {
            return Err(EngineError::insufficient(
                ticker,
                format!("no trading days between {start} and {end}"),
            ));
        }
        Ok(series)
    }
}
