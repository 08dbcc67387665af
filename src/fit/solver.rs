//! Weighted Levenberg-Marquardt least squares.
//!
//! Minimises `Σ wᵢ (tᵢ - f(xᵢ; p))²` for a [`BackgroundFunction`] `f` using
//! its analytic gradient. The damping follows Nielsen's update rule; the
//! fit is considered converged once the weighted RMS of two successive
//! accepted iterations differs by less than `epsilon`.

use thiserror::Error;

use super::functions::BackgroundFunction;

/// Lower bound for diagonal entries of the damping matrix.
const MIN_DIAGONAL: f64 = 1e-12;
/// Initial damping factor.
const INITIAL_LAMBDA: f64 = 1e-3;
/// Damping beyond this means no descent direction is left.
const MAX_LAMBDA: f64 = 1e32;
/// Relative step size below which the parameters no longer move.
const STEP_TOLERANCE: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub epsilon: f64,
    pub max_iterations: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            max_iterations: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("no convergence after {iterations} iterations: {reason}")]
    NonConvergence { iterations: u32, reason: &'static str },
}

/// Weighted observations for one fit.
#[derive(Clone, Copy)]
pub struct LeastSquaresProblem<'a> {
    pub function: &'a dyn BackgroundFunction,
    pub x: &'a [f64],
    pub target: &'a [f64],
    pub weights: &'a [f64],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub parameters: Vec<f64>,
    pub iterations: u32,
    /// Weighted RMS residual at the solution.
    pub rms: f64,
}

impl LeastSquaresProblem<'_> {
    fn len(&self) -> usize {
        self.x.len().min(self.target.len()).min(self.weights.len())
    }

    /// `Σ wᵢ rᵢ²`
    fn cost(&self, params: &[f64]) -> f64 {
        (0..self.len())
            .map(|i| {
                let r = self.target[i] - self.function.value(self.x[i], params);
                self.weights[i] * r * r
            })
            .sum()
    }

    fn rms(&self, cost: f64) -> f64 {
        (cost / self.len().max(1) as f64).sqrt()
    }

    /// Normal equations `JᵀWJ` (row-major) and `JᵀWr`.
    fn normal_equations(&self, params: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let np = params.len();
        let mut jtj = vec![0.0; np * np];
        let mut jtr = vec![0.0; np];
        for i in 0..self.len() {
            let (x, w) = (self.x[i], self.weights[i]);
            let r = self.target[i] - self.function.value(x, params);
            let j = self.function.gradient(x, params);
            for p in 0..np {
                jtr[p] += w * j[p] * r;
                for q in p..np {
                    jtj[p * np + q] += w * j[p] * j[q];
                }
            }
        }
        for p in 0..np {
            for q in 0..p {
                jtj[p * np + q] = jtj[q * np + p];
            }
        }
        (jtj, jtr)
    }
}

/// Run the solver from `initial`.
pub fn solve(
    problem: &LeastSquaresProblem<'_>,
    initial: &[f64],
    settings: &SolverSettings,
) -> Result<Solution, SolverError> {
    let np = initial.len();
    let mut params = initial.to_vec();
    let mut cost = problem.cost(&params);
    if !cost.is_finite() {
        return Err(SolverError::NonConvergence {
            iterations: 0,
            reason: "residuals at the initial guess are not finite",
        });
    }
    let mut rms = problem.rms(cost);
    let mut lambda = INITIAL_LAMBDA;
    let mut nu = 2.0;
    let (mut jtj, mut jtr) = problem.normal_equations(&params);
    let mut mat = vec![0.0; np * np];

    for iteration in 1..=settings.max_iterations {
        let done = Solution {
            parameters: params.clone(),
            iterations: iteration - 1,
            rms,
        };
        if cost == 0.0 || jtr.iter().all(|&g| g == 0.0) {
            return Ok(done);
        }
        if jtj.iter().chain(jtr.iter()).any(|v| !v.is_finite()) {
            return Err(SolverError::NonConvergence {
                iterations: iteration,
                reason: "jacobian is not finite",
            });
        }

        // Damped normal equations
        mat.copy_from_slice(&jtj);
        for p in 0..np {
            mat[p * np + p] += lambda * jtj[p * np + p].max(MIN_DIAGONAL);
        }

        let step = cholesky_solve(&mut mat, &jtr);
        let accepted = step.as_ref().and_then(|delta| {
            let candidate: Vec<f64> = params.iter().zip(delta).map(|(p, d)| p + d).collect();
            let new_cost = problem.cost(&candidate);
            // Nielsen gain ratio
            let predicted: f64 = delta
                .iter()
                .enumerate()
                .map(|(i, d)| d * (lambda * jtj[i * np + i].max(MIN_DIAGONAL) * d + jtr[i]))
                .sum();
            let rho = (cost - new_cost) / predicted;
            (new_cost.is_finite() && predicted > 0.0 && rho > 0.0)
                .then_some((candidate, new_cost, rho))
        });

        match accepted {
            Some((candidate, new_cost, rho)) => {
                params = candidate;
                cost = new_cost;
                let previous_rms = rms;
                rms = problem.rms(cost);
                lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                nu = 2.0;
                if (rms - previous_rms).abs() < settings.epsilon {
                    return Ok(Solution {
                        parameters: params,
                        iterations: iteration,
                        rms,
                    });
                }
                (jtj, jtr) = problem.normal_equations(&params);
            }
            None => {
                if let Some(delta) = &step {
                    let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                    let delta_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
                    if delta_norm <= STEP_TOLERANCE * (param_norm + STEP_TOLERANCE) {
                        return Ok(Solution {
                            iterations: iteration,
                            ..done
                        });
                    }
                }
                lambda *= nu;
                nu *= 2.0;
                if !(lambda < MAX_LAMBDA) {
                    return Err(SolverError::NonConvergence {
                        iterations: iteration,
                        reason: "no step reduces the residual",
                    });
                }
            }
        }
    }

    Err(SolverError::NonConvergence {
        iterations: settings.max_iterations,
        reason: "iteration limit reached",
    })
}

/// Solves `a · x = b` for the damped normal matrix `a` (`n x n`, row-major).
///
/// `a` is overwritten by its factor `L` (lower triangle). `None` unless `a`
/// is positive definite.
pub(crate) fn cholesky_solve(a: &mut [f64], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    for row in 0..n {
        for col in 0..=row {
            let dot: f64 = (0..col).map(|k| a[row * n + k] * a[col * n + k]).sum();
            let value = a[row * n + col] - dot;
            a[row * n + col] = if row == col {
                if !(value > 0.0) {
                    return None;
                }
                value.sqrt()
            } else {
                value / a[col * n + col]
            };
        }
    }

    let mut x = b.to_vec();
    for row in 0..n {
        let dot: f64 = (0..row).map(|k| a[row * n + k] * x[k]).sum();
        x[row] = (x[row] - dot) / a[row * n + row];
    }
    for row in (0..n).rev() {
        let dot: f64 = (row + 1..n).map(|k| a[k * n + row] * x[k]).sum();
        x[row] = (x[row] - dot) / a[row * n + row];
    }
    Some(x)
}
