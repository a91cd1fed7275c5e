//! Request and response shapes of the analysis engine.

use crate::core::error::{EngineError, ErrorPayload};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub tickers: Vec<String>,
    pub quantities: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_beta: Option<f64>,
    pub start_date: NaiveDate,
    /// Defaults to today
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Overrides the configured Monte Carlo sample count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Ticker to weight, each weight in [0, 1] and summing to 1.
pub type PortfolioWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    #[serde(rename = "return")]
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
}

impl PortfolioStats {
    pub fn evaluate(
        weights: &DVector<f64>,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        risk_free_rate: f64,
    ) -> Self {
        let expected_return = weights.dot(mean);
        let variance = (covariance * weights).dot(weights);
        let volatility = variance.max(0.0).sqrt();
        PortfolioStats {
            expected_return,
            volatility,
            sharpe: sharpe_ratio(expected_return, volatility, risk_free_rate),
        }
    }
}

/// Excess return per unit of volatility; zero for a riskless portfolio.
pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility <= f64::EPSILON {
        0.0
    } else {
        (expected_return - risk_free_rate) / volatility
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalPortfolio {
    pub weights: PortfolioWeights,
    pub stats: PortfolioStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierPoint {
    #[serde(rename = "return")]
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl From<PortfolioStats> for FrontierPoint {
    fn from(stats: PortfolioStats) -> Self {
        FrontierPoint {
            expected_return: stats.expected_return,
            volatility: stats.volatility,
            sharpe_ratio: stats.sharpe,
        }
    }
}

/// Offsetting positions; negative quantities are shorts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HedgeRecommendation {
    pub spy_shares: i64,
    pub spy_notional: f64,
    pub es_contracts: i64,
    pub es_notional: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub gmv: OptimalPortfolio,
    pub max_sharpe: OptimalPortfolio,
    pub efficient_frontier: Vec<FrontierPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_portfolios: Option<Vec<FrontierPoint>>,
    pub portfolio_beta: f64,
    pub hedging: HedgeRecommendation,
    pub risk_free_rate: f64,
    /// First and last day of the requested price history
    pub analysis_date: NaiveDate,
    pub analysis_end_date: NaiveDate,
}

/// Wire form of `Result<AnalysisResult, EngineError>`: exactly one of a
/// success document or an error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineResponse {
    Failure(ErrorPayload),
    Success(Box<AnalysisResult>),
}

impl From<Result<AnalysisResult, EngineError>> for EngineResponse {
    fn from(result: Result<AnalysisResult, EngineError>) -> Self {
        match result {
            Ok(analysis) => EngineResponse::Success(Box::new(analysis)),
            Err(err) => EngineResponse::Failure(ErrorPayload::from(&err)),
        }
    }
}

impl EngineResponse {
    pub fn into_result(self) -> Result<AnalysisResult, EngineError> {
        match self {
            EngineResponse::Success(analysis) => Ok(*analysis),
            EngineResponse::Failure(payload) => Err(EngineError::from(payload)),
        }
    }
}
