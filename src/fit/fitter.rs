use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::filter::{poisson_weight, WeightedPoints};
use crate::data::model::PointSet;

use super::functions::{BackgroundFunction, LinearFunction, PowerLawFunction};
use super::solver::{solve, LeastSquaresProblem, SolverError, SolverSettings};

// ---------------------------------------------------------------------------
// FitOutcome – classification of a finished fit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    Success,
    /// The solver gave up; parameters are NaN.
    NonConvergence,
    /// Parameter at this index came out NaN.
    ParameterNaN(usize),
    /// Parameter at this index came out infinite.
    ParameterInfinite(usize),
}

impl FitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FitOutcome::Success)
    }
}

impl fmt::Display for FitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitOutcome::Success => write!(f, "success"),
            FitOutcome::NonConvergence => write!(f, "the fit did not converge"),
            FitOutcome::ParameterNaN(i) => write!(f, "parameter {i} is NaN"),
            FitOutcome::ParameterInfinite(i) => write!(f, "parameter {i} is infinite"),
        }
    }
}

/// Inspect fitted parameters; the first offending parameter decides.
pub fn classify(parameters: &[f64]) -> FitOutcome {
    for (i, p) in parameters.iter().enumerate() {
        if p.is_nan() {
            return FitOutcome::ParameterNaN(i);
        }
        if p.is_infinite() {
            return FitOutcome::ParameterInfinite(i);
        }
    }
    FitOutcome::Success
}

// ---------------------------------------------------------------------------
// FitOptions / FitResult
// ---------------------------------------------------------------------------

/// Per-call fit configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitOptions {
    pub solver: SolverSettings,
    /// Overrides the model's seed vector.
    pub initial_guess: Option<Vec<f64>>,
}

impl FitOptions {
    pub fn with_epsilon(epsilon: f64) -> Self {
        Self {
            solver: SolverSettings {
                epsilon,
                ..SolverSettings::default()
            },
            initial_guess: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub model: &'static str,
    pub parameters: Vec<f64>,
    pub outcome: FitOutcome,
    pub iterations: u32,
    /// Weighted RMS residual, NaN when the solver failed.
    pub rms: f64,
}

impl FitResult {
    fn failed(model: &'static str, parameter_count: usize, iterations: u32) -> Self {
        Self {
            model,
            parameters: vec![f64::NAN; parameter_count],
            outcome: FitOutcome::NonConvergence,
            iterations,
            rms: f64::NAN,
        }
    }
}

/// Fit `function` to prepared, weighted points.
pub fn fit(
    function: &dyn BackgroundFunction,
    points: &WeightedPoints,
    options: &FitOptions,
) -> FitResult {
    let initial = options
        .initial_guess
        .clone()
        .unwrap_or_else(|| function.initial_parameters());
    let problem = LeastSquaresProblem {
        function,
        x: &points.x,
        target: &points.y,
        weights: &points.weights,
    };

    match solve(&problem, &initial, &options.solver) {
        Ok(solution) => {
            let outcome = classify(&solution.parameters);
            log::debug!(
                "{}: {:?} after {} iterations ({outcome})",
                function.name(),
                solution.parameters,
                solution.iterations
            );
            FitResult {
                model: function.name(),
                parameters: solution.parameters,
                outcome,
                iterations: solution.iterations,
                rms: solution.rms,
            }
        }
        Err(SolverError::NonConvergence { iterations, reason }) => {
            log::warn!("{}: {reason} ({iterations} iterations)", function.name());
            FitResult::failed(function.name(), initial.len(), iterations)
        }
    }
}

// ---------------------------------------------------------------------------
// BackgroundFit – fitted curve and signal over a whole spectrum
// ---------------------------------------------------------------------------

/// Background evaluated at every sample of a spectrum, and the remaining
/// signal `observed - fitted`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundFit {
    pub result: FitResult,
    pub x: Vec<f64>,
    pub fitted: Vec<f64>,
    pub signal: Vec<f64>,
}

impl BackgroundFit {
    pub fn evaluate(
        function: &dyn BackgroundFunction,
        result: FitResult,
        spectrum: &PointSet,
    ) -> Self {
        let fitted: Vec<f64> = spectrum
            .x
            .iter()
            .map(|&x| function.value(x, &result.parameters))
            .collect();
        let signal = spectrum
            .y
            .iter()
            .zip(fitted.iter())
            .map(|(y, f)| y - f)
            .collect();
        Self {
            result,
            x: spectrum.x.clone(),
            fitted,
            signal,
        }
    }
}

// ---------------------------------------------------------------------------
// Power-law fit with the public (a, r) convention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerLawMode {
    /// Non-linear fit of `a * x^p` on the raw data.
    #[default]
    Direct,
    /// Straight line through `(ln x, ln y)`.
    LogLog,
}

/// Seed of the log-log line: intercept `ln a`, slope `-r`.
const LOG_LOG_SEED: [f64; 2] = [20.0, -2.0];

/// `y = a * x^-r`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawFit {
    pub a: f64,
    pub r: f64,
    pub outcome: FitOutcome,
    pub iterations: u32,
}

impl PowerLawFit {
    fn failed(outcome: FitOutcome, iterations: u32) -> Self {
        Self {
            a: f64::NAN,
            r: f64::NAN,
            outcome,
            iterations,
        }
    }

    pub fn value(&self, x: f64) -> f64 {
        self.a * x.powf(-self.r)
    }
}

/// Fit a power law to raw samples. Weights are `sqrt(y)` of the raw counts
/// in both modes. Non-finite samples (or logarithms) give NonConvergence.
pub fn fit_power_law(
    x: &[f64],
    y: &[f64],
    mode: PowerLawMode,
    options: &FitOptions,
) -> PowerLawFit {
    let weights: Vec<f64> = y.iter().map(|&y| poisson_weight(y)).collect();
    let (fx, fy, function, default_seed): (Vec<f64>, Vec<f64>, &dyn BackgroundFunction, Vec<f64>) =
        match mode {
            PowerLawMode::Direct => (
                x.to_vec(),
                y.to_vec(),
                &PowerLawFunction,
                PowerLawFunction.initial_parameters(),
            ),
            PowerLawMode::LogLog => (
                x.iter().map(|v| v.ln()).collect(),
                y.iter().map(|v| v.ln()).collect(),
                &LinearFunction,
                LOG_LOG_SEED.to_vec(),
            ),
        };

    if fx.iter().chain(fy.iter()).any(|v| !v.is_finite()) {
        log::warn!("Power law fit skipped: samples are not finite");
        return PowerLawFit::failed(FitOutcome::NonConvergence, 0);
    }

    let points = WeightedPoints {
        x: fx,
        y: fy,
        weights,
    };
    let options = FitOptions {
        solver: options.solver,
        initial_guess: Some(options.initial_guess.clone().unwrap_or(default_seed)),
    };
    let result = fit(function, &points, &options);
    if !result.outcome.is_success() {
        return PowerLawFit::failed(result.outcome, result.iterations);
    }

    let (a, slope) = (result.parameters[0], result.parameters[1]);
    PowerLawFit {
        a: match mode {
            PowerLawMode::Direct => a,
            PowerLawMode::LogLog => a.exp(),
        },
        r: -slope,
        outcome: FitOutcome::Success,
        iterations: result.iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::prepare_points;
    use crate::data::model::EnergyInterval;
    use crate::fit::functions::ThreeParameterFunction;

    fn power_law_samples() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (1..=100).map(|i| i as f64 * 10.0).collect();
        let y = x.iter().map(|&x| 5.0 * x.powf(-2.0)).collect();
        (x, y)
    }

    fn assert_close(actual: f64, expected: f64, rel: f64) {
        assert!(
            (actual - expected).abs() <= rel * expected.abs(),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn direct_power_law_recovers_parameters() {
        let (x, y) = power_law_samples();
        let fit = fit_power_law(&x, &y, PowerLawMode::Direct, &FitOptions::with_epsilon(1e-12));
        assert_eq!(fit.outcome, FitOutcome::Success);
        assert_close(fit.a, 5.0, 1e-6);
        assert_close(fit.r, 2.0, 1e-6);
    }

    #[test]
    fn log_log_power_law_recovers_parameters() {
        let (x, y) = power_law_samples();
        let fit = fit_power_law(&x, &y, PowerLawMode::LogLog, &FitOptions::with_epsilon(1e-12));
        assert_eq!(fit.outcome, FitOutcome::Success);
        assert_close(fit.a, 5.0, 1e-6);
        assert_close(fit.r, 2.0, 1e-6);
    }

    #[test]
    fn log_log_with_default_epsilon_is_close() {
        let (x, y) = power_law_samples();
        let fit = fit_power_law(&x, &y, PowerLawMode::LogLog, &FitOptions::default());
        assert_eq!(fit.outcome, FitOutcome::Success);
        assert_close(fit.a, 5.0, 1e-2);
        assert_close(fit.r, 2.0, 1e-2);
    }

    #[test]
    fn zero_counts_cannot_be_fitted_in_log_space() {
        let (x, mut y) = power_law_samples();
        y[3] = 0.0;
        let fit = fit_power_law(&x, &y, PowerLawMode::LogLog, &FitOptions::default());
        assert_eq!(fit.outcome, FitOutcome::NonConvergence);
        assert!(fit.a.is_nan() && fit.r.is_nan());
    }

    #[test]
    fn solver_failure_yields_nan_sentinel() {
        let (x, y) = power_law_samples();
        let options = FitOptions {
            solver: SolverSettings {
                epsilon: 1e-300,
                max_iterations: 1,
            },
            initial_guess: None,
        };
        let points = WeightedPoints {
            weights: y.iter().map(|v| v.sqrt()).collect(),
            x,
            y,
        };
        let result = fit(&PowerLawFunction, &points, &options);
        assert_eq!(result.outcome, FitOutcome::NonConvergence);
        assert_eq!(result.parameters.len(), 2);
        assert!(result.parameters.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn classification_reports_first_bad_parameter() {
        assert_eq!(classify(&[1.0, 2.0]), FitOutcome::Success);
        assert_eq!(classify(&[1.0, f64::NAN]), FitOutcome::ParameterNaN(1));
        assert_eq!(
            classify(&[f64::INFINITY, f64::NAN]),
            FitOutcome::ParameterInfinite(0)
        );
        assert_eq!(
            classify(&[0.0, f64::NEG_INFINITY, 1.0]),
            FitOutcome::ParameterInfinite(1)
        );
    }

    #[test]
    fn linear_background_is_recovered_in_window() {
        let points = PointSet::from_pairs(
            (0..200)
                .map(|i| {
                    let x = 100.0 + i as f64;
                    (x, 500.0 - 0.75 * x)
                })
                .collect(),
        );
        let prepared = prepare_points(&points, EnergyInterval::new(120.0, 220.0), 2).unwrap();
        let result = fit(&LinearFunction, &prepared, &FitOptions::with_epsilon(1e-12));
        assert!(result.outcome.is_success());
        assert_close(result.parameters[0], 500.0, 1e-6);
        assert_close(result.parameters[1], -0.75, 1e-6);
    }

    #[test]
    fn three_parameter_model_is_recovered_near_the_seed() {
        let truth = [-3.0, 12.0, 20.0];
        let points = PointSet::from_pairs(
            (0..60)
                .map(|i| {
                    let x = 20.0 + 3.0 * i as f64;
                    (x, ThreeParameterFunction.value(x, &truth))
                })
                .collect(),
        );
        let prepared = prepare_points(&points, EnergyInterval::new(0.0, 1e3), 3).unwrap();
        let options = FitOptions {
            solver: SolverSettings {
                epsilon: 1e-12,
                ..SolverSettings::default()
            },
            initial_guess: Some(vec![-2.8, 11.5, 10.0]),
        };
        let result = fit(&ThreeParameterFunction, &prepared, &options);
        assert!(result.outcome.is_success(), "{result:?}");
        assert_close(result.parameters[0], -3.0, 1e-3);
        assert_close(result.parameters[1], 12.0, 1e-3);
        assert_close(result.parameters[2], 20.0, 1e-2);
    }

    #[test]
    fn background_fit_spans_whole_spectrum() {
        let spectrum = PointSet::from_pairs(vec![(1.0, 5.0), (2.0, 7.0), (3.0, 10.0)]);
        let result = FitResult {
            model: "Linear function",
            parameters: vec![2.0, 3.0],
            outcome: FitOutcome::Success,
            iterations: 1,
            rms: 0.0,
        };
        let fit = BackgroundFit::evaluate(&LinearFunction, result, &spectrum);
        assert_eq!(fit.fitted, vec![5.0, 8.0, 11.0]);
        assert_eq!(fit.signal, vec![0.0, -1.0, -1.0]);
    }
}
