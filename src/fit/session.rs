use thiserror::Error;

use crate::data::filter::{prepare_points, PointSetError};
use crate::data::model::{EnergyInterval, PointSet, Spectrum};

use super::fitter::{fit, BackgroundFit, FitOptions};
use super::functions::FunctionRegistry;

/// What the user asked for: model, window and solver options.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRequest {
    pub model: String,
    pub interval: EnergyInterval,
    pub options: FitOptions,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Unknown background model '{0}'")]
    UnknownModel(String),

    #[error("The spectrum has no samples")]
    EmptySpectrum,

    #[error("Fit window {0} lies outside the spectrum")]
    EmptyWindow(EnergyInterval),

    #[error(transparent)]
    Points(#[from] PointSetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    /// A new fit was computed.
    Fitted,
    /// Same request as last time; the previous fit is still valid.
    Unchanged,
}

/// Remembers the last fit request and its result.
///
/// A request that cannot be fitted leaves the previous result in place.
#[derive(Default)]
pub struct FitSession {
    registry: FunctionRegistry,
    last_request: Option<FitRequest>,
    last_fit: Option<BackgroundFit>,
    last_window: PointSet,
}

impl FitSession {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            last_request: None,
            last_fit: None,
            last_window: PointSet::default(),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn last_fit(&self) -> Option<&BackgroundFit> {
        self.last_fit.as_ref()
    }

    pub fn last_request(&self) -> Option<&FitRequest> {
        self.last_request.as_ref()
    }

    /// Samples inside the window of the last successful request.
    pub fn window(&self) -> &PointSet {
        &self.last_window
    }

    /// Forget everything, e.g. after loading another spectrum.
    pub fn reset(&mut self) {
        self.last_request = None;
        self.last_fit = None;
        self.last_window = PointSet::default();
    }

    pub fn update(
        &mut self,
        spectrum: &Spectrum,
        request: FitRequest,
    ) -> Result<SessionUpdate, SessionError> {
        let function = self
            .registry
            .create(&request.model)
            .ok_or_else(|| SessionError::UnknownModel(request.model.clone()))?;
        let (min, max) = spectrum.range().ok_or(SessionError::EmptySpectrum)?;
        let interval = request
            .interval
            .clamp_to(min, max)
            .ok_or(SessionError::EmptyWindow(request.interval))?;
        let request = FitRequest { interval, ..request };

        if self.last_fit.is_some() && self.last_request.as_ref() == Some(&request) {
            return Ok(SessionUpdate::Unchanged);
        }

        let prepared = prepare_points(&spectrum.points, interval, function.parameter_count())?;
        let result = fit(function.as_ref(), &prepared, &request.options);
        log::info!(
            "{} on {interval}: {} after {} iterations",
            result.model,
            result.outcome,
            result.iterations
        );

        self.last_window = PointSet {
            x: prepared.x,
            y: prepared.y,
        };
        self.last_fit = Some(BackgroundFit::evaluate(
            function.as_ref(),
            result,
            &spectrum.points,
        ));
        self.last_request = Some(request);
        Ok(SessionUpdate::Fitted)
    }
}
