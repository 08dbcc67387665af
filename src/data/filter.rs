use thiserror::Error;

use super::model::{EnergyInterval, PointSet};

// ---------------------------------------------------------------------------
// Interval filter
// ---------------------------------------------------------------------------

/// Return the samples inside `interval` (inclusive), preserving order.
///
/// The source set is left untouched, and filtering the result again with
/// the same interval yields the same set.
pub fn filter_interval(points: &PointSet, interval: EnergyInterval) -> PointSet {
    let (x, y) = points
        .iter()
        .filter(|&(xi, _)| interval.contains(xi))
        .unzip();
    PointSet { x, y }
}

// ---------------------------------------------------------------------------
// Point-set preparation for the fitter
// ---------------------------------------------------------------------------

/// Why a point set was rejected before fitting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PointSetError {
    #[error("Empty fit window {start}..{stop}")]
    EmptyInterval { start: f64, stop: f64 },

    #[error("{found} points in the fit window, the model needs at least {required}")]
    TooFewPoints { found: usize, required: usize },

    #[error("Sample {index} is not finite (x = {x}, y = {y}, weight = {weight})")]
    NonFinite {
        index: usize,
        x: f64,
        y: f64,
        weight: f64,
    },
}

/// Samples ready for a weighted fit.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPoints {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub weights: Vec<f64>,
}

impl WeightedPoints {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Weight of a counted intensity: `sqrt(y)` (Poisson statistics).
pub fn poisson_weight(intensity: f64) -> f64 {
    intensity.sqrt()
}

/// Filter `points` to `interval`, derive Poisson weights and check that
/// every sample is finite and that at least `parameter_count` samples remain.
pub fn prepare_points(
    points: &PointSet,
    interval: EnergyInterval,
    parameter_count: usize,
) -> Result<WeightedPoints, PointSetError> {
    if !(interval.start <= interval.stop) {
        return Err(PointSetError::EmptyInterval {
            start: interval.start,
            stop: interval.stop,
        });
    }

    let filtered = filter_interval(points, interval);
    if filtered.len() < parameter_count {
        return Err(PointSetError::TooFewPoints {
            found: filtered.len(),
            required: parameter_count,
        });
    }

    let weights: Vec<f64> = filtered.y.iter().map(|&y| poisson_weight(y)).collect();
    for (index, ((&x, &y), &weight)) in filtered
        .x
        .iter()
        .zip(filtered.y.iter())
        .zip(weights.iter())
        .enumerate()
    {
        if !(x.is_finite() && y.is_finite() && weight.is_finite()) {
            return Err(PointSetError::NonFinite {
                index,
                x,
                y,
                weight,
            });
        }
    }

    Ok(WeightedPoints {
        x: filtered.x,
        y: filtered.y,
        weights,
    })
}
