//! Long-only mean-variance optimization: the global minimum-variance
//! portfolio, the maximum-Sharpe (tangency) portfolio and the efficient
//! frontier.

use crate::core::error::{EngineError, Result};
use crate::engine::estimator::Estimates;
use crate::engine::model::{FrontierPoint, OptimalPortfolio, PortfolioStats, PortfolioWeights};
use crate::engine::qp::{QpFailure, QuadraticProgram};
use nalgebra::{DMatrix, DVector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct SolverSettings {
    pub risk_free_rate: f64,
    pub frontier_points: usize,
    pub max_iterations: usize,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub gmv: OptimalPortfolio,
    pub max_sharpe: OptimalPortfolio,
    pub frontier: Vec<FrontierPoint>,
}

#[derive(Clone)]
struct Candidate {
    weights: DVector<f64>,
    stats: PortfolioStats,
}

pub fn solve(
    estimates: &Estimates,
    settings: &SolverSettings,
    cancel: &CancellationToken,
) -> Result<Solution> {
    let gmv = global_minimum_variance(estimates, settings)?;
    debug!(
        "GMV portfolio: return {:.4}, volatility {:.4}",
        gmv.stats.expected_return, gmv.stats.volatility
    );

    let mut frontier =
        frontier_candidates(estimates, settings, gmv.stats.expected_return, cancel)?;
    if frontier.is_empty() {
        frontier.push(gmv.clone());
    }

    let max_sharpe = match tangency(estimates, settings)? {
        Some(candidate) => candidate,
        None => {
            warn!(
                "No asset beats the risk-free rate of {:.4}, using the best single asset",
                settings.risk_free_rate
            );
            best_single_asset(estimates, settings).unwrap_or_else(|| gmv.clone())
        }
    };

    Ok(Solution {
        gmv: to_portfolio(estimates, &gmv),
        max_sharpe: to_portfolio(estimates, &max_sharpe),
        frontier: efficient_subset(frontier.iter().map(|c| FrontierPoint::from(c.stats)).collect()),
    })
}

fn global_minimum_variance(estimates: &Estimates, settings: &SolverSettings) -> Result<Candidate> {
    let n = estimates.asset_count();
    let program = QuadraticProgram {
        hessian: &estimates.covariance,
        equalities: DMatrix::from_element(1, n, 1.0),
        rhs: DVector::from_element(1, 1.0),
    };
    let start = DVector::from_element(n, 1.0 / n as f64);
    let solution = program
        .solve(start, settings.max_iterations)
        .map_err(|failure| optimization_failed(None, failure))?;
    Ok(candidate(estimates, settings, solution.x))
}

/// Exact long-only tangency portfolio, found through the convex program
/// `min yᵀΣy  s.t. (μ - rf)ᵀy = 1, y ≥ 0` with `w = y / 1ᵀy`.
///
/// `None` when no asset has an expected return above the risk-free rate.
fn tangency(estimates: &Estimates, settings: &SolverSettings) -> Result<Option<Candidate>> {
    let excess = estimates.mean.add_scalar(-settings.risk_free_rate);
    let (best, best_excess) = excess
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| EngineError::validation("at least one ticker is required"))?;
    if best_excess <= 0.0 {
        return Ok(None);
    }

    let n = estimates.asset_count();
    let program = QuadraticProgram {
        hessian: &estimates.covariance,
        equalities: DMatrix::from_row_slice(1, n, excess.as_slice()),
        rhs: DVector::from_element(1, 1.0),
    };
    let mut start = DVector::zeros(n);
    start[best] = 1.0 / best_excess;
    let solution = program
        .solve(start, settings.max_iterations)
        .map_err(|failure| optimization_failed(None, failure))?;

    let total = solution.x.sum();
    if !(total > 0.0) {
        return Err(EngineError::OptimizationFailed {
            target_return: None,
            iterations: solution.iterations,
            reason: "tangency portfolio has no positive weight".to_string(),
        });
    }
    Ok(Some(candidate(estimates, settings, solution.x / total)))
}

/// Highest-Sharpe portfolio when every excess return is non-positive.
///
/// With `y = w / (rf - μ)ᵀw` the negated Sharpe ratio becomes `√(yᵀΣy)`
/// over `{y ≥ 0, (rf - μ)ᵀy = 1}`, a convex function on a polytope, so the
/// optimum sits on a vertex: a single-asset portfolio.
fn best_single_asset(estimates: &Estimates, settings: &SolverSettings) -> Option<Candidate> {
    let n = estimates.asset_count();
    (0..n)
        .map(|k| {
            let mut weights = DVector::zeros(n);
            weights[k] = 1.0;
            candidate(estimates, settings, weights)
        })
        .max_by(|a, b| a.stats.sharpe.total_cmp(&b.stats.sharpe))
}

/// Minimum-variance portfolios for evenly spaced target returns between the
/// GMV return and the highest expected return. Targets that fail to solve
/// are skipped; empty when there is no return range above the GMV.
fn frontier_candidates(
    estimates: &Estimates,
    settings: &SolverSettings,
    gmv_return: f64,
    cancel: &CancellationToken,
) -> Result<Vec<Candidate>> {
    let n = estimates.asset_count();
    let mean = &estimates.mean;
    let (lowest, highest) = (mean.imin(), mean.imax());
    let (mean_low, mean_high) = (mean[lowest], mean[highest]);

    if mean_high - gmv_return < 1e-12 || mean_high - mean_low < 1e-12 {
        debug!("No return range above the GMV portfolio, frontier is a single point");
        return Ok(Vec::new());
    }

    let mut equalities = DMatrix::from_element(2, n, 1.0);
    equalities.set_row(1, &mean.transpose());

    let points = settings.frontier_points.max(2);
    let step = (mean_high - gmv_return) / (points - 1) as f64;
    let mut candidates = Vec::with_capacity(points);
    for k in 0..points {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let target = if k == points - 1 {
            mean_high
        } else {
            gmv_return + step * k as f64
        };

        let alpha = ((target - mean_low) / (mean_high - mean_low)).clamp(0.0, 1.0);
        let mut start = DVector::zeros(n);
        start[lowest] += 1.0 - alpha;
        start[highest] += alpha;

        let program = QuadraticProgram {
            hessian: &estimates.covariance,
            equalities: equalities.clone(),
            rhs: DVector::from_vec(vec![1.0, target]),
        };
        match program.solve(start, settings.max_iterations) {
            Ok(solution) => candidates.push(candidate(estimates, settings, solution.x)),
            Err(failure) => warn!(
                "Skipping frontier point: {}",
                optimization_failed(Some(target), failure)
            ),
        }
    }
    debug!("Solved {} of {} frontier points", candidates.len(), points);
    Ok(candidates)
}

/// Sorts by volatility and drops points dominated by a less volatile one.
fn efficient_subset(mut points: Vec<FrontierPoint>) -> Vec<FrontierPoint> {
    points.sort_by(|a, b| {
        a.volatility
            .total_cmp(&b.volatility)
            .then(b.expected_return.total_cmp(&a.expected_return))
    });
    let mut efficient: Vec<FrontierPoint> = Vec::with_capacity(points.len());
    for point in points {
        match efficient.last() {
            Some(last) if point.expected_return < last.expected_return => {}
            _ => efficient.push(point),
        }
    }
    efficient
}

fn candidate(estimates: &Estimates, settings: &SolverSettings, weights: DVector<f64>) -> Candidate {
    let weights = clean_weights(weights);
    let stats = PortfolioStats::evaluate(
        &weights,
        &estimates.mean,
        &estimates.covariance,
        settings.risk_free_rate,
    );
    Candidate { weights, stats }
}

/// Clears round-off below zero and renormalizes to a unit budget.
fn clean_weights(mut weights: DVector<f64>) -> DVector<f64> {
    weights.apply(|w| {
        if *w < 0.0 {
            *w = 0.0;
        }
    });
    let total = weights.sum();
    if total > 0.0 {
        weights /= total;
    }
    weights
}

fn to_portfolio(estimates: &Estimates, candidate: &Candidate) -> OptimalPortfolio {
    let weights: PortfolioWeights = estimates
        .tickers
        .iter()
        .cloned()
        .zip(candidate.weights.iter().copied())
        .collect();
    OptimalPortfolio {
        weights,
        stats: candidate.stats,
    }
}

fn optimization_failed(target_return: Option<f64>, failure: QpFailure) -> EngineError {
    EngineError::OptimizationFailed {
        target_return,
        iterations: failure.iterations,
        reason: failure.reason,
    }
}
