//! Beta of the current holdings against the benchmark, and the ETF and
//! index-future positions that move it to a target.

use crate::core::error::{EngineError, Result};
use crate::engine::estimator::Estimates;
use crate::engine::model::HedgeRecommendation;
use nalgebra::DVector;

/// Market-value weights of the held quantities at the last common close.
pub fn current_weights(quantities: &[f64], last_prices: &DVector<f64>) -> Result<DVector<f64>> {
    let values = DVector::from_iterator(
        quantities.len(),
        quantities.iter().zip(last_prices.iter()).map(|(q, p)| q * p),
    );
    let total = values.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(EngineError::validation(
            "current holdings have no market value",
        ));
    }
    Ok(values / total)
}

/// `Cov(r_p, r_b) / Var(r_b)` over the aligned daily returns.
pub fn portfolio_beta(
    estimates: &Estimates,
    weights: &DVector<f64>,
    benchmark: &str,
) -> Result<f64> {
    let portfolio_returns = &estimates.returns * weights;
    let benchmark_returns = &estimates.benchmark_returns;
    let observations = benchmark_returns.len();
    if observations < 2 {
        return Err(EngineError::BenchmarkDataUnavailable {
            symbol: benchmark.to_string(),
            reason: "not enough aligned returns".to_string(),
        });
    }

    let benchmark_mean = benchmark_returns.mean();
    let portfolio_mean = portfolio_returns.mean();
    let (covariance, variance) = portfolio_returns
        .iter()
        .zip(benchmark_returns.iter())
        .fold((0.0, 0.0), |(cov, var), (rp, rb)| {
            let db = rb - benchmark_mean;
            (cov + (rp - portfolio_mean) * db, var + db * db)
        });

    if variance <= f64::EPSILON * f64::EPSILON * observations as f64 {
        return Err(EngineError::BenchmarkDataUnavailable {
            symbol: benchmark.to_string(),
            reason: "benchmark returns have zero variance".to_string(),
        });
    }
    Ok(covariance / variance)
}

#[derive(Debug, Clone, Copy)]
pub struct HedgeSizing {
    pub beta: f64,
    pub target_beta: f64,
    pub portfolio_value: f64,
    pub etf_price: f64,
    pub future_price: f64,
    pub contract_multiplier: f64,
}

impl HedgeSizing {
    /// Dollar exposure to add (positive) or remove (negative).
    pub fn notional(&self) -> f64 {
        (self.target_beta - self.beta) * self.portfolio_value
    }

    pub fn recommend(&self) -> HedgeRecommendation {
        let notional = self.notional();
        let spy_shares = (notional / self.etf_price).round() as i64;
        let contract_value = self.future_price * self.contract_multiplier;
        let es_contracts = (notional / contract_value).round() as i64;
        HedgeRecommendation {
            spy_shares,
            spy_notional: spy_shares as f64 * self.etf_price,
            es_contracts,
            es_notional: es_contracts as f64 * contract_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn sizing(beta: f64) -> HedgeSizing {
        HedgeSizing {
            beta,
            target_beta: 0.0,
            portfolio_value: 100_000.0,
            etf_price: 500.0,
            future_price: 2500.0,
            contract_multiplier: 50.0,
        }
    }

    #[test]
    fn test_hedge_for_high_beta_portfolio() {
        let hedge = sizing(1.25);
        assert_eq!(hedge.notional(), -125_000.0);

        let recommendation = hedge.recommend();
        assert_eq!(recommendation.spy_shares, -250);
        assert_eq!(recommendation.spy_notional, -125_000.0);
        // One contract carries 125,000 of exposure
        assert_eq!(recommendation.es_contracts, -1);
        assert_eq!(recommendation.es_notional, -125_000.0);
    }

    #[test]
    fn test_hedge_sign_follows_beta_gap() {
        assert!(sizing(0.8).notional() < 0.0);
        assert!(sizing(-0.4).notional() > 0.0);
        assert!(sizing(-0.4).recommend().spy_shares > 0);

        let neutral = HedgeSizing {
            target_beta: 1.1,
            ..sizing(1.1)
        };
        assert_eq!(neutral.notional(), 0.0);
        let recommendation = neutral.recommend();
        assert_eq!(recommendation.spy_shares, 0);
        assert_eq!(recommendation.es_contracts, 0);
    }

    #[test]
    fn test_current_weights() {
        let prices = DVector::from_vec(vec![200.0, 50.0]);
        let weights = current_weights(&[10.0, 40.0], &prices).unwrap();
        assert!((weights[0] - 0.5).abs() < 1e-12);
        assert!((weights[1] - 0.5).abs() < 1e-12);

        let err = current_weights(&[0.0, 0.0], &prices).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Validation);
    }

    fn estimates(returns: DMatrix<f64>, benchmark: Vec<f64>) -> Estimates {
        let n = returns.ncols();
        Estimates {
            tickers: (0..n).map(|i| format!("T{i}")).collect(),
            dates: Vec::new(),
            mean: DVector::zeros(n),
            covariance: DMatrix::identity(n, n),
            returns,
            benchmark_returns: DVector::from_vec(benchmark),
            last_prices: DVector::from_element(n, 1.0),
            benchmark_last_price: 1.0,
            ridge: 0.0,
        }
    }

    #[test]
    fn test_beta_of_scaled_benchmark() {
        let benchmark = vec![0.01, -0.02, 0.015, 0.003, -0.007];
        let returns = DMatrix::from_fn(5, 2, |row, col| {
            // Asset 0 doubles the benchmark, asset 1 halves it
            benchmark[row] * if col == 0 { 2.0 } else { 0.5 }
        });
        let est = estimates(returns, benchmark);

        let beta = portfolio_beta(&est, &DVector::from_vec(vec![0.5, 0.5]), "SPY").unwrap();
        assert!((beta - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_flat_benchmark_is_unavailable() {
        let est = estimates(DMatrix::from_element(4, 1, 0.01), vec![0.0; 4]);
        let err = portfolio_beta(&est, &DVector::from_vec(vec![1.0]), "SPY").unwrap_err();
        assert!(matches!(err, EngineError::BenchmarkDataUnavailable { .. }));
        assert!(err.to_string().contains("SPY"));
    }
}
