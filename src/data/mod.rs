/// Data layer: spectrum types, importing, and fit-window preparation.
///
/// Architecture:
/// ```text
///  .msa / .csv / spectrum image / DM3 calibration
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Spectrum
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ Spectrum  │  PointSet (ascending energy loss), units
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  energy window → weighted, validated points
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
