//! Background fitting: model functions, the weighted Levenberg-Marquardt
//! solver, result classification and the interactive fit session.

pub mod fitter;
pub mod functions;
pub mod session;
pub mod solver;

pub use fitter::{
    classify, fit, fit_power_law, BackgroundFit, FitOptions, FitOutcome, FitResult, PowerLawFit,
    PowerLawMode,
};
pub use functions::{BackgroundFunction, FunctionRegistry};
pub use session::{FitRequest, FitSession, SessionError, SessionUpdate};
pub use solver::SolverSettings;
