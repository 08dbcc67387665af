//! EELS and EFTEM analysis: background fitting of energy-loss spectra,
//! elemental maps from ESI series, drift estimation for image stacks and
//! DQE measurement of detectors.

pub mod config;
pub mod data;
pub mod dqe;
pub mod drift;
pub mod error;
pub mod esi;
pub mod fit;
pub mod image;

pub use error::{EftemError, Result};
