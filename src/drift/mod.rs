//! Drift estimation for image stacks.
//!
//! ```text
//!   template ──crop(ROI + Δ)──► reference ─┐
//!                                          ├─► task per row ─► ShiftMap
//!   others ────crop(ROI)──────► target ────┘   (2Δ+1 rows)
//! ```
//!
//! Every non-template image gets a `(2Δ+1)²` map of normalised
//! cross-correlation coefficients; its argmax is the drift of that image.

pub mod correlation;
pub mod executor;

pub use correlation::{correlate_row, Shift, ShiftMap, TargetStats};
pub use executor::{CancelToken, DriftEstimator, DriftInput, DriftResult};
