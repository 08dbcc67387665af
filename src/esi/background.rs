use std::fmt;

use crate::fit::{classify, fit_power_law, FitOptions, FitOutcome, PowerLawFit, PowerLawMode};
use crate::image::FloatImage;

/// One energy-filtered image and the energy loss it was recorded at.
#[derive(Debug, Clone, PartialEq)]
pub struct EsiImage {
    pub energy_loss: f64,
    pub image: FloatImage,
}

impl EsiImage {
    pub fn new(energy_loss: f64, image: FloatImage) -> Self {
        Self { energy_loss, image }
    }
}

// ---------------------------------------------------------------------------
// PixelError – why a pixel has no background
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelError {
    /// A pre-edge image holds a negative count at this pixel.
    NegativeCounts,
    /// The power-law fit failed.
    Fit(FitOutcome),
    /// The row was never processed.
    Cancelled,
}

impl PixelError {
    /// Value written to the error image; 0 marks a good pixel.
    pub fn code(&self) -> u16 {
        match self {
            PixelError::NegativeCounts => 200,
            PixelError::Fit(FitOutcome::NonConvergence) => 240,
            PixelError::Fit(_) => 250,
            PixelError::Cancelled => 255,
        }
    }
}

impl fmt::Display for PixelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelError::NegativeCounts => write!(f, "negative pre-edge counts"),
            PixelError::Fit(outcome) => write!(f, "{outcome}"),
            PixelError::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fit `a * E^-r` to the pre-edge counts of one pixel.
pub fn fit_pixel(
    energies: &[f64],
    counts: &[f64],
    mode: PowerLawMode,
    options: &FitOptions,
) -> Result<PowerLawFit, PixelError> {
    if counts.iter().any(|&c| c < 0.0) {
        return Err(PixelError::NegativeCounts);
    }
    let fit = fit_power_law(energies, counts, mode, options);
    if !fit.outcome.is_success() {
        return Err(PixelError::Fit(fit.outcome));
    }
    // exp(ln a) may still overflow
    match classify(&[fit.a, fit.r]) {
        FitOutcome::Success => Ok(fit),
        outcome => Err(PixelError::Fit(outcome)),
    }
}
