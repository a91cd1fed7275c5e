use crate::engine::estimator::Estimates;
use crate::engine::model::{FrontierPoint, PortfolioStats};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use tracing::debug;

/// Random long-only portfolios for plotting the feasible region.
///
/// Weights are uniform on the simplex: independent `Exp(1)` draws normalized
/// to sum to one. A seed makes the output reproducible.
pub fn sample(
    estimates: &Estimates,
    count: usize,
    risk_free_rate: f64,
    seed: Option<u64>,
) -> Vec<FrontierPoint> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let n = estimates.asset_count();
    let mut portfolios = Vec::with_capacity(count);
    while portfolios.len() < count {
        let weights = DVector::<f64>::from_fn(n, |_, _| rng.sample(Exp1));
        let total = weights.sum();
        if !(total > 0.0) {
            continue;
        }
        let stats = PortfolioStats::evaluate(
            &(weights / total),
            &estimates.mean,
            &estimates.covariance,
            risk_free_rate,
        );
        portfolios.push(FrontierPoint::from(stats));
    }
    debug!("Sampled {} random portfolios", portfolios.len());
    portfolios
}
