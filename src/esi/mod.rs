//! Elemental maps from energy-filtered (ESI) image series.
//!
//! Every pixel's pre-edge counts are fitted with a power law `a * E^-r`.
//! The fit is extrapolated to each post-edge energy loss and subtracted,
//! leaving the edge signal. Pixels whose fit fails carry a [`PixelError`]
//! and are NaN in all outputs.

pub mod background;
pub mod executor;

pub use background::{fit_pixel, EsiImage, PixelError};
pub use executor::{save_maps, ElementalMap, ElementalMaps, MapCalculator, MapInput};
