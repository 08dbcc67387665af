//! Detective quantum efficiency measured by binning.
//!
//! A flat-field image is summed over `b x b` blocks for every factor `b`
//! up to a limit; `mean / variance * sensitivity` of each binned image is
//! the DQE at that factor.

pub mod binning;
pub mod report;

pub use binning::{measure_dqe, DqeDataset, DqeMeasurement, DqeSettings};
pub use report::{render_report, save_reports, ReportLocale};
