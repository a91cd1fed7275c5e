use crate::core::config::AnalysisConfig;
use crate::core::error::{EngineError, Result};
use crate::engine::model::AnalysisRequest;
use chrono::NaiveDate;
use std::collections::HashSet;

/// Upper bound on per-request Monte Carlo samples.
pub const MAX_SAMPLES: usize = 1_000_000;

/// An analysis request with defaults applied and every field checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub tickers: Vec<String>,
    pub quantities: Vec<f64>,
    pub portfolio_value: f64,
    pub target_beta: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub samples: usize,
    pub seed: Option<u64>,
}

pub fn validate(
    request: &AnalysisRequest,
    config: &AnalysisConfig,
    today: NaiveDate,
) -> Result<ValidatedRequest> {
    if request.tickers.is_empty() {
        return Err(EngineError::validation("at least one ticker is required"));
    }
    if request.tickers.len() != request.quantities.len() {
        return Err(EngineError::validation(format!(
            "tickers and quantities must have the same length ({} tickers, {} quantities)",
            request.tickers.len(),
            request.quantities.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut tickers = Vec::with_capacity(request.tickers.len());
    for raw in &request.tickers {
        let ticker = raw.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(EngineError::validation("tickers must not be empty"));
        }
        if !seen.insert(ticker.clone()) {
            return Err(EngineError::validation(format!("duplicate ticker: {ticker}")));
        }
        tickers.push(ticker);
    }

    for (ticker, quantity) in tickers.iter().zip(&request.quantities) {
        if !quantity.is_finite() || *quantity < 0.0 {
            return Err(EngineError::validation(format!(
                "quantity for {ticker} must be a non-negative number, got {quantity}"
            )));
        }
    }
    if !(request.quantities.iter().sum::<f64>() > 0.0) {
        return Err(EngineError::validation(
            "at least one quantity must be positive",
        ));
    }

    let portfolio_value = request
        .portfolio_value
        .unwrap_or(config.default_portfolio_value);
    if !portfolio_value.is_finite() || portfolio_value < 0.0 {
        return Err(EngineError::validation(format!(
            "portfolio value must be a non-negative number, got {portfolio_value}"
        )));
    }
    let target_beta = request.target_beta.unwrap_or(config.default_target_beta);
    if !target_beta.is_finite() {
        return Err(EngineError::validation("target beta must be a finite number"));
    }

    let start = request.start_date;
    let end = request.end_date.unwrap_or(today);
    for (label, date) in [("start", start), ("end", end)] {
        if date > today {
            return Err(EngineError::validation(format!(
                "{label} date {date} cannot be in the future"
            )));
        }
    }
    if start >= end {
        return Err(EngineError::validation(format!(
            "start date {start} must be before end date {end}"
        )));
    }
    let span = (end - start).num_days();
    if span < config.min_span_days {
        return Err(EngineError::validation(format!(
            "date range of {span} days is too short, at least {} days required",
            config.min_span_days
        )));
    }

    let samples = request.samples.unwrap_or(config.random_portfolios);
    if samples > MAX_SAMPLES {
        return Err(EngineError::validation(format!(
            "samples must not exceed {MAX_SAMPLES}"
        )));
    }

    Ok(ValidatedRequest {
        tickers,
        quantities: request.quantities.clone(),
        portfolio_value,
        target_beta,
        start,
        end,
        samples,
        seed: request.seed,
    })
}
