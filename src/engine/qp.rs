//! Primal active-set solver for small convex quadratic programs
//!
//! ```text
//! minimize    ½ xᵀQx
//! subject to  Ex = f,  x ≥ 0
//! ```
//!
//! Q must be symmetric positive semi-definite and the starting point feasible.
//! Bounds enter and leave a working set; the equality constraints stay in the
//! KKT system of every step.

use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct QpFailure {
    pub iterations: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub iterations: usize,
}

pub struct QuadraticProgram<'a> {
    pub hessian: &'a DMatrix<f64>,
    pub equalities: DMatrix<f64>,
    pub rhs: DVector<f64>,
}

impl QuadraticProgram<'_> {
    pub fn solve(&self, start: DVector<f64>, max_iterations: usize) -> Result<QpSolution, QpFailure> {
        let n = self.hessian.nrows();
        let mut x = start;
        // Variables held at their lower bound
        let mut fixed: Vec<bool> = x.iter().map(|&v| v <= 0.0).collect();
        for (value, &at_bound) in x.iter_mut().zip(&fixed) {
            if at_bound {
                *value = 0.0;
            }
        }

        for iteration in 1..=max_iterations {
            let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
            let gradient = self.hessian * &x;
            let (step, multipliers) =
                self.equality_step(&free, &gradient)
                    .ok_or_else(|| QpFailure {
                        iterations: iteration,
                        reason: "singular KKT system".to_string(),
                    })?;

            let step_tolerance = 1e-10 * x.amax().max(1.0);
            if step.amax() <= step_tolerance {
                // Bound multipliers of the fixed variables
                let constraint_gradient = self.equalities.transpose() * &multipliers;
                let tolerance = 1e-10 * gradient.amax().max(1.0);
                let release = (0..n)
                    .filter(|&i| fixed[i])
                    .map(|i| (i, gradient[i] + constraint_gradient[i]))
                    .filter(|&(_, multiplier)| multiplier < -tolerance)
                    .min_by(|a, b| a.1.total_cmp(&b.1));
                match release {
                    Some((index, _)) => fixed[index] = false,
                    None => {
                        return Ok(QpSolution {
                            x,
                            iterations: iteration,
                        });
                    }
                }
                continue;
            }

            // Longest feasible step along the direction
            let mut alpha = 1.0;
            let mut blocking = None;
            for (k, &i) in free.iter().enumerate() {
                if step[k] < 0.0 {
                    let ratio = -x[i] / step[k];
                    if ratio < alpha {
                        alpha = ratio;
                        blocking = Some(i);
                    }
                }
            }
            for (k, &i) in free.iter().enumerate() {
                x[i] = (x[i] + alpha * step[k]).max(0.0);
            }
            if let Some(i) = blocking {
                x[i] = 0.0;
                fixed[i] = true;
            }
        }

        Err(QpFailure {
            iterations: max_iterations,
            reason: "iteration limit reached".to_string(),
        })
    }

    /// Solves the equality-constrained subproblem over the free variables:
    ///
    /// ```text
    /// [ Q_FF  E_Fᵀ ] [ p ]   [ -g_F ]
    /// [ E_F   0    ] [ λ ] = [  0   ]
    /// ```
    fn equality_step(
        &self,
        free: &[usize],
        gradient: &DVector<f64>,
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        let k = free.len();
        let m = self.equalities.nrows();
        let mut kkt = DMatrix::<f64>::zeros(k + m, k + m);
        let mut rhs = DVector::<f64>::zeros(k + m);
        for (a, &i) in free.iter().enumerate() {
            for (b, &j) in free.iter().enumerate() {
                kkt[(a, b)] = self.hessian[(i, j)];
            }
            for row in 0..m {
                kkt[(a, k + row)] = self.equalities[(row, i)];
                kkt[(k + row, a)] = self.equalities[(row, i)];
            }
            rhs[a] = -gradient[i];
        }

        let solution = solve_kkt(&kkt, &rhs)?;
        Some((
            solution.rows(0, k).into_owned(),
            solution.rows(k, m).into_owned(),
        ))
    }
}

/// LU first; SVD least squares when the working set leaves the system
/// rank-deficient.
fn solve_kkt(kkt: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let accurate = |x: &DVector<f64>| {
        x.iter().all(|v| v.is_finite()) && (kkt * x - rhs).amax() <= 1e-9 * rhs.amax().max(1.0)
    };
    if let Some(x) = kkt.clone().lu().solve(rhs) {
        if accurate(&x) {
            return Some(x);
        }
    }
    let x = kkt.clone().svd(true, true).solve(rhs, 1e-12).ok()?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(n: usize) -> (DMatrix<f64>, DVector<f64>) {
        (DMatrix::from_element(1, n, 1.0), DVector::from_element(1, 1.0))
    }

    #[test]
    fn test_unconstrained_optimum_is_interior() {
        let q = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]);
        let (equalities, rhs) = budget(2);
        let program = QuadraticProgram {
            hessian: &q,
            equalities,
            rhs,
        };
        let solution = program
            .solve(DVector::from_vec(vec![0.5, 0.5]), 100)
            .unwrap();
        assert!((solution.x[0] - 9.0 / 13.0).abs() < 1e-10);
        assert!((solution.x[1] - 4.0 / 13.0).abs() < 1e-10);
    }

    #[test]
    fn test_binding_bound_is_held_at_zero() {
        // Unconstrained minimum would short the second asset
        let q = DMatrix::from_row_slice(2, 2, &[0.04, 0.06, 0.06, 0.16]);
        let (equalities, rhs) = budget(2);
        let program = QuadraticProgram {
            hessian: &q,
            equalities,
            rhs,
        };
        let solution = program
            .solve(DVector::from_vec(vec![0.5, 0.5]), 100)
            .unwrap();
        assert!((solution.x[0] - 1.0).abs() < 1e-12);
        assert_eq!(solution.x[1], 0.0);
    }

    #[test]
    fn test_bound_is_released_when_multiplier_is_negative() {
        let q = DMatrix::from_row_slice(3, 3, &[0.05, 0.0, 0.0, 0.0, 0.05, 0.0, 0.0, 0.0, 0.05]);
        let (equalities, rhs) = budget(3);
        let program = QuadraticProgram {
            hessian: &q,
            equalities,
            rhs,
        };
        // Starts on a vertex with two variables fixed
        let solution = program
            .solve(DVector::from_vec(vec![1.0, 0.0, 0.0]), 100)
            .unwrap();
        for i in 0..3 {
            assert!((solution.x[i] - 1.0 / 3.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_two_equality_constraints() {
        let q = DMatrix::from_row_slice(3, 3, &[0.04, 0.0, 0.0, 0.0, 0.09, 0.0, 0.0, 0.0, 0.16]);
        let mean = [0.05, 0.10, 0.15];
        let target = 0.12;
        let equalities = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, mean[0], mean[1], mean[2]]);
        let program = QuadraticProgram {
            hessian: &q,
            equalities,
            rhs: DVector::from_vec(vec![1.0, target]),
        };
        let alpha = (target - 0.05) / 0.10;
        let solution = program
            .solve(DVector::from_vec(vec![1.0 - alpha, 0.0, alpha]), 200)
            .unwrap();

        let x = &solution.x;
        assert!((x.sum() - 1.0).abs() < 1e-10);
        assert!((x[0] * mean[0] + x[1] * mean[1] + x[2] * mean[2] - target).abs() < 1e-10);
        assert!(x.iter().all(|&v| v >= 0.0));
        // Better than the starting mix
        let start_variance = (1.0 - alpha).powi(2) * 0.04 + alpha.powi(2) * 0.16;
        assert!((x.transpose() * &q * x)[(0, 0)] < start_variance);
    }

    #[test]
    fn test_iteration_limit() {
        let q = DMatrix::from_row_slice(3, 3, &[0.05, 0.0, 0.0, 0.0, 0.05, 0.0, 0.0, 0.0, 0.05]);
        let (equalities, rhs) = budget(3);
        let program = QuadraticProgram {
            hessian: &q,
            equalities,
            rhs,
        };
        let failure = program
            .solve(DVector::from_vec(vec![1.0, 0.0, 0.0]), 1)
            .unwrap_err();
        assert_eq!(failure.iterations, 1);
        assert_eq!(failure.reason, "iteration limit reached");
    }
}
