use thiserror::Error;

use crate::image::FloatImage;

// ---------------------------------------------------------------------------
// TargetStats – precomputed once per target image
// ---------------------------------------------------------------------------

/// Mean of the target crop and the root of its summed squared deviations,
/// `sqrt(Σq² - n·mean²)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetStats {
    pub mean: f64,
    pub sigma: f64,
}

impl TargetStats {
    pub fn of(target: &FloatImage) -> Self {
        let n = target.pixel_count() as f64;
        let (sum, sum_sq) = target
            .pixels()
            .iter()
            .fold((0.0_f64, 0.0_f64), |(s, sq), &v| {
                let v = v as f64;
                (s + v, sq + v * v)
            });
        let mean = sum / n;
        Self {
            mean,
            sigma: (sum_sq - n * mean * mean).sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("Reference {reference:?} does not cover target {target:?} shifted by {delta}")]
    ReferenceTooSmall {
        reference: (usize, usize),
        target: (usize, usize),
        delta: usize,
    },

    #[error("Row {row} is outside a shift map of size {size}")]
    RowOutOfRange { row: usize, size: usize },

    #[error("Output row has {actual} cells, expected {expected}")]
    OutputLength { actual: usize, expected: usize },
}

// ---------------------------------------------------------------------------
// Row kernel
// ---------------------------------------------------------------------------

/// Fill one row of a shift map.
///
/// `reference` is the ROI grown by `delta` on every side, `target` the ROI
/// itself. Cell `x` of row `row` holds the normalised correlation of the
/// target with the reference window whose top-left corner is `(x, row)`.
/// Flat windows yield NaN or infinite coefficients.
pub fn correlate_row(
    reference: &FloatImage,
    target: &FloatImage,
    stats: TargetStats,
    delta: usize,
    row: usize,
    out: &mut [f64],
) -> Result<(), CorrelationError> {
    let size = 2 * delta + 1;
    let (tw, th) = target.dimensions();
    if reference.width() < tw + 2 * delta || reference.height() < th + 2 * delta {
        return Err(CorrelationError::ReferenceTooSmall {
            reference: reference.dimensions(),
            target: target.dimensions(),
            delta,
        });
    }
    if row >= size {
        return Err(CorrelationError::RowOutOfRange { row, size });
    }
    if out.len() != size {
        return Err(CorrelationError::OutputLength {
            actual: out.len(),
            expected: size,
        });
    }

    let n = target.pixel_count() as f64;
    for (x, cell) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut covariance = 0.0;
        for j in 0..th {
            let window = &reference.row(row + j)[x..x + tw];
            for (&t, &q) in window.iter().zip(target.row(j)) {
                let t = t as f64;
                sum += t;
                sum_sq += t * t;
                covariance += t * q as f64;
            }
        }
        let mean = sum / n;
        *cell = (covariance - n * mean * stats.mean)
            / ((sum_sq - n * mean * mean).sqrt() * stats.sigma);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ShiftMap
// ---------------------------------------------------------------------------

/// Offset of the best matching reference window relative to the ROI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shift {
    pub dx: i64,
    pub dy: i64,
    pub coefficient: f64,
}

/// `(2Δ+1)²` correlation coefficients, row-major. Unwritten cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftMap {
    delta: usize,
    values: Vec<f64>,
}

impl ShiftMap {
    pub fn new(delta: usize) -> Self {
        let size = 2 * delta + 1;
        Self {
            delta,
            values: vec![f64::NAN; size * size],
        }
    }

    pub fn delta(&self) -> usize {
        self.delta
    }

    /// Side length, `2Δ+1`.
    pub fn size(&self) -> usize {
        2 * self.delta + 1
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.size() + x]
    }

    pub fn row(&self, y: usize) -> &[f64] {
        let size = self.size();
        &self.values[y * size..(y + 1) * size]
    }

    /// Disjoint mutable rows, one per task.
    pub fn rows_mut(&mut self) -> std::slice::ChunksMut<'_, f64> {
        let size = self.size();
        self.values.chunks_mut(size)
    }

    /// Argmax over all finite coefficients. The first maximum in row-major
    /// order wins.
    pub fn best_shift(&self) -> Option<Shift> {
        let size = self.size();
        let delta = self.delta as i64;
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, coefficient)| Shift {
                dx: (i % size) as i64 - delta,
                dy: (i / size) as i64 - delta,
                coefficient,
            })
    }
}
