//! Annualized return and covariance estimates on a common trading calendar.

use crate::core::config::AnalysisConfig;
use crate::core::error::{EngineError, Result};
use crate::core::price::PriceSeries;
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Estimates {
    pub tickers: Vec<String>,
    /// Date of each return observation (the later day of each pair)
    pub dates: Vec<NaiveDate>,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Daily log returns, one row per date and one column per ticker
    pub returns: DMatrix<f64>,
    pub benchmark_returns: DVector<f64>,
    /// Close of every ticker on the last common date
    pub last_prices: DVector<f64>,
    pub benchmark_last_price: f64,
    /// Diagonal loading added to the covariance, zero when none was needed
    pub ridge: f64,
}

impl Estimates {
    pub fn asset_count(&self) -> usize {
        self.tickers.len()
    }
}

pub fn estimate(
    series: &[PriceSeries],
    benchmark: &PriceSeries,
    config: &AnalysisConfig,
) -> Result<Estimates> {
    if series.is_empty() {
        return Err(EngineError::validation("at least one ticker is required"));
    }
    let min_days = config.min_trading_days;

    let short: Vec<String> = series
        .iter()
        .chain(std::iter::once(benchmark))
        .filter(|s| s.len() < min_days)
        .map(|s| s.ticker.clone())
        .collect();
    if !short.is_empty() {
        return Err(EngineError::DataInsufficient {
            tickers: short,
            reason: format!("fewer than {min_days} trading days of price history"),
        });
    }

    let calendar = common_calendar(series, benchmark);
    if calendar.len() < min_days {
        let mut tickers: Vec<String> = series.iter().map(|s| s.ticker.clone()).collect();
        tickers.push(benchmark.ticker.clone());
        return Err(EngineError::DataInsufficient {
            tickers,
            reason: format!(
                "only {} common trading days, at least {min_days} required",
                calendar.len()
            ),
        });
    }
    debug!(
        "Aligned {} series on {} common trading days",
        series.len() + 1,
        calendar.len()
    );

    let n = series.len();
    let observations = calendar.len() - 1;
    let mut returns = DMatrix::<f64>::zeros(observations, n);
    for (col, s) in series.iter().enumerate() {
        let closes = aligned_closes(s, &calendar)?;
        for (row, pair) in closes.windows(2).enumerate() {
            returns[(row, col)] = (pair[1] / pair[0]).ln();
        }
    }
    let benchmark_closes = aligned_closes(benchmark, &calendar)?;
    let benchmark_returns = DVector::from_iterator(
        observations,
        benchmark_closes.windows(2).map(|pair| (pair[1] / pair[0]).ln()),
    );

    let last_date = calendar[calendar.len() - 1];
    let last_prices = DVector::from_iterator(
        n,
        series.iter().map(|s| s.close_on(last_date).unwrap_or(f64::NAN)),
    );
    let benchmark_last_price = benchmark_closes[benchmark_closes.len() - 1];

    let annualization = config.trading_days_per_year;
    let daily_mean = column_means(&returns);
    let mean = &daily_mean * annualization;
    let mut covariance = sample_covariance(&returns, &daily_mean) * annualization;
    let ridge = regularize(&mut covariance);

    if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
        return Err(EngineError::DataInsufficient {
            tickers: series.iter().map(|s| s.ticker.clone()).collect(),
            reason: "price history produced non-finite return estimates".to_string(),
        });
    }

    Ok(Estimates {
        tickers: series.iter().map(|s| s.ticker.clone()).collect(),
        dates: calendar[1..].to_vec(),
        mean,
        covariance,
        returns,
        benchmark_returns,
        last_prices,
        benchmark_last_price,
        ridge,
    })
}

/// Annualized mean daily simple return of a treasury ETF, or `None` when the
/// series has fewer than two closes.
pub fn risk_free_rate(series: &PriceSeries, trading_days_per_year: f64) -> Option<f64> {
    let returns: Vec<f64> = series
        .points
        .windows(2)
        .map(|pair| pair[1].close / pair[0].close - 1.0)
        .collect();
    if returns.is_empty() {
        return None;
    }
    let rate = returns.iter().sum::<f64>() / returns.len() as f64 * trading_days_per_year;
    rate.is_finite().then_some(rate)
}

fn common_calendar(series: &[PriceSeries], benchmark: &PriceSeries) -> Vec<NaiveDate> {
    let mut dates: BTreeSet<NaiveDate> = benchmark.points.iter().map(|p| p.date).collect();
    for s in series {
        let own: BTreeSet<NaiveDate> = s.points.iter().map(|p| p.date).collect();
        dates.retain(|d| own.contains(d));
    }
    dates.into_iter().collect()
}

fn aligned_closes(series: &PriceSeries, calendar: &[NaiveDate]) -> Result<Vec<f64>> {
    calendar
        .iter()
        .map(|date| {
            series.close_on(*date).ok_or_else(|| {
                EngineError::insufficient(&series.ticker, format!("missing close on {date}"))
            })
        })
        .collect()
}

fn column_means(returns: &DMatrix<f64>) -> DVector<f64> {
    let rows = returns.nrows() as f64;
    DVector::from_iterator(
        returns.ncols(),
        returns.column_iter().map(|col| col.sum() / rows),
    )
}

/// Unbiased (n - 1) covariance of the columns, symmetrized.
fn sample_covariance(returns: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let mut centered = returns.clone();
    for (mut col, m) in centered.column_iter_mut().zip(mean.iter()) {
        col.add_scalar_mut(-m);
    }
    let denominator = (returns.nrows().saturating_sub(1)).max(1) as f64;
    let covariance = centered.transpose() * &centered / denominator;
    (&covariance + covariance.transpose()) * 0.5
}

/// Adds diagonal loading when the covariance is numerically singular and
/// returns the amount added.
fn regularize(covariance: &mut DMatrix<f64>) -> f64 {
    let n = covariance.nrows();
    let average_variance = covariance.trace() / n as f64;
    let min_eigenvalue = SymmetricEigen::new(covariance.clone()).eigenvalues.min();
    if min_eigenvalue >= 1e-10 * average_variance.max(1e-12) {
        return 0.0;
    }
    let ridge = (1e-6 * average_variance).max(1e-10);
    warn!(
        "Covariance matrix is near-singular (min eigenvalue {:.3e}), adding ridge {:.3e}",
        min_eigenvalue, ridge
    );
    for i in 0..n {
        covariance[(i, i)] += ridge;
    }
    ridge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::price::PricePoint;

    fn day(offset: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(offset as u64)
    }

    fn series_from_closes(ticker: &str, closes: &[f64]) -> PriceSeries {
        PriceSeries::new(
            ticker,
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| PricePoint { date: day(i), close })
                .collect(),
        )
    }

    /// Prices whose log returns follow `returns` exactly.
    fn series_from_returns(ticker: &str, returns: &[f64]) -> PriceSeries {
        let mut closes = vec![100.0];
        for r in returns {
            let last = closes[closes.len() - 1];
            closes.push(last * r.exp());
        }
        series_from_closes(ticker, &closes)
    }

    fn alternating(len: usize, a: f64, b: f64) -> Vec<f64> {
        (0..len).map(|i| if i % 2 == 0 { a } else { b }).collect()
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            min_trading_days: 5,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_annualized_mean_and_covariance() {
        let r1 = alternating(60, 0.01, -0.005);
        let r2 = alternating(60, -0.002, 0.004);
        let bench = alternating(60, 0.003, 0.001);
        let estimates = estimate(
            &[series_from_returns("AAA", &r1), series_from_returns("BBB", &r2)],
            &series_from_returns("SPY", &bench),
            &config(),
        )
        .unwrap();

        assert_eq!(estimates.asset_count(), 2);
        assert_eq!(estimates.returns.nrows(), 60);
        assert_eq!(estimates.dates.len(), 60);
        assert!((estimates.mean[0] - 0.0025 * 252.0).abs() < 1e-9);
        assert!((estimates.mean[1] - 0.001 * 252.0).abs() < 1e-9);

        // Deviations are +-0.0075 and -+0.003, perfectly anti-correlated
        let var1 = 0.0075f64.powi(2) * 60.0 / 59.0 * 252.0;
        let var2 = 0.003f64.powi(2) * 60.0 / 59.0 * 252.0;
        let cov = -0.0075 * 0.003 * 60.0 / 59.0 * 252.0;
        let ridge = estimates.ridge;
        assert!((estimates.covariance[(0, 0)] - var1 - ridge).abs() < 1e-9);
        assert!((estimates.covariance[(1, 1)] - var2 - ridge).abs() < 1e-9);
        assert!((estimates.covariance[(0, 1)] - cov).abs() < 1e-9);
        assert_eq!(estimates.covariance[(0, 1)], estimates.covariance[(1, 0)]);
        // Perfect anti-correlation is singular
        assert!(ridge > 0.0);
    }

    #[test]
    fn test_well_conditioned_covariance_is_untouched() {
        let r1: Vec<f64> = (0..50).map(|i| ((i * 7 % 11) as f64 - 5.0) * 0.002).collect();
        let r2: Vec<f64> = (0..50).map(|i| ((i * 3 % 13) as f64 - 6.0) * 0.003).collect();
        let estimates = estimate(
            &[series_from_returns("AAA", &r1), series_from_returns("BBB", &r2)],
            &series_from_returns("SPY", &r1),
            &config(),
        )
        .unwrap();
        assert_eq!(estimates.ridge, 0.0);
        assert!((estimates.last_prices[0] - 100.0 * r1.iter().sum::<f64>().exp()).abs() < 1e-9);
    }

    #[test]
    fn test_series_are_aligned_on_common_dates() {
        let full = series_from_returns("AAA", &alternating(20, 0.01, -0.01));
        let mut gappy = series_from_returns("BBB", &alternating(20, 0.02, -0.01));
        gappy.points.remove(10);
        let bench = series_from_returns("SPY", &alternating(20, 0.005, 0.0));

        let estimates = estimate(&[full, gappy], &bench, &config()).unwrap();
        // 21 closes, one dropped from the calendar
        assert_eq!(estimates.returns.nrows(), 19);
        assert!(!estimates.dates.contains(&day(10)));
    }

    #[test]
    fn test_short_history_names_offending_tickers() {
        let long = series_from_returns("AAPL", &alternating(60, 0.01, -0.01));
        let short = series_from_returns("NEWCO", &alternating(10, 0.01, -0.01));
        let bench = series_from_returns("SPY", &alternating(60, 0.01, 0.0));
        let config = AnalysisConfig::default();

        let err = estimate(&[long, short], &bench, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInsufficient);
        match err {
            EngineError::DataInsufficient { tickers, .. } => assert_eq!(tickers, vec!["NEWCO"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disjoint_calendars_are_insufficient() {
        let a = series_from_returns("AAA", &alternating(30, 0.01, -0.01));
        let mut b = series_from_returns("BBB", &alternating(30, 0.01, -0.01));
        for point in &mut b.points {
            point.date = point.date + chrono::Days::new(20);
        }
        let bench = series_from_returns("SPY", &alternating(60, 0.01, 0.0));

        let config = AnalysisConfig {
            min_trading_days: 15,
            ..AnalysisConfig::default()
        };

        // Only days 20..=30 overlap
        let err = estimate(&[a, b], &bench, &config).unwrap_err();
        match err {
            EngineError::DataInsufficient { tickers, reason } => {
                assert_eq!(tickers, vec!["AAA", "BBB", "SPY"]);
                assert!(reason.contains("common trading days"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_constant_prices_get_a_ridge() {
        let flat = series_from_closes("FLAT", &[50.0; 10]);
        let bench = series_from_returns("SPY", &alternating(9, 0.01, -0.01));
        let estimates = estimate(&[flat], &bench, &config()).unwrap();
        assert_eq!(estimates.mean[0], 0.0);
        assert!(estimates.ridge > 0.0);
        assert!(estimates.covariance[(0, 0)] > 0.0);
    }

    #[test]
    fn test_risk_free_rate_from_treasury_closes() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.0002f64.powi(i)).collect();
        let sgov = series_from_closes("SGOV", &closes);
        let rate = risk_free_rate(&sgov, 252.0).unwrap();
        assert!((rate - 0.0002 * 252.0).abs() < 1e-9);

        let single = series_from_closes("SGOV", &[100.0]);
        assert_eq!(risk_free_rate(&single, 252.0), None);
    }
}
