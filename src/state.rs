use std::path::Path;

use anyhow::Context;

use eftem_tools::config::EftemConfig;
use eftem_tools::data::loader::load_file;
use eftem_tools::data::model::{EnergyInterval, Spectrum};
use eftem_tools::fit::{FitOptions, FitRequest, FitSession, SessionUpdate, SolverSettings};

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    /// Loaded spectrum (None until user loads a file).
    pub spectrum: Option<Spectrum>,

    /// Last request and fit.
    pub session: FitSession,

    /// Selected background model.
    pub model: String,

    /// Fit window limits, in energy-loss units.
    pub lower: f64,
    pub upper: f64,

    /// Draw the signal below zero instead of clipping it.
    pub show_negative: bool,

    pub options: FitOptions,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
    pub status_is_error: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self::from_config(&EftemConfig::default())
    }
}

impl AppState {
    pub fn from_config(config: &EftemConfig) -> Self {
        Self {
            spectrum: None,
            session: FitSession::default(),
            model: config.fit.default_model.clone(),
            lower: 0.0,
            upper: 0.0,
            show_negative: false,
            options: FitOptions {
                solver: SolverSettings {
                    epsilon: config.fit.epsilon,
                    max_iterations: config.fit.max_iterations,
                },
                initial_guess: None,
            },
            status_message: None,
            status_is_error: false,
        }
    }

    /// Import a spectrum file and fit it with the current model.
    pub fn open(&mut self, path: &Path) -> anyhow::Result<()> {
        let spectrum = load_file(path).with_context(|| format!("Cannot open {}", path.display()))?;
        self.set_spectrum(spectrum);
        Ok(())
    }

    /// Ingest a newly loaded spectrum and place a default fit window in
    /// front of the first fifth of its range.
    pub fn set_spectrum(&mut self, spectrum: Spectrum) {
        self.session.reset();
        if let Some((min, max)) = spectrum.range() {
            let span = max - min;
            self.lower = min + 0.05 * span;
            self.upper = min + 0.2 * span;
        }
        self.spectrum = Some(spectrum);
        self.set_status(None, false);
        self.refit();
    }

    pub fn set_model(&mut self, model: &str) {
        if self.model != model {
            self.model = model.to_string();
            self.refit();
        }
    }

    /// Fit the current window; the previous fit survives a rejected window.
    pub fn refit(&mut self) {
        let Some(spectrum) = &self.spectrum else {
            return;
        };
        let request = FitRequest {
            model: self.model.clone(),
            interval: EnergyInterval::new(self.lower, self.upper),
            options: self.options.clone(),
        };
        match self.session.update(spectrum, request) {
            Ok(SessionUpdate::Unchanged) => {}
            Ok(SessionUpdate::Fitted) => {
                let message = self.session.last_fit().map(|fit| {
                    (
                        fit.result.outcome.is_success(),
                        format!(
                            "{}: {} ({} iterations)",
                            fit.result.model, fit.result.outcome, fit.result.iterations
                        ),
                    )
                });
                if let Some((success, text)) = message {
                    self.set_status(Some(text), !success);
                }
            }
            Err(err) => {
                log::warn!("Fit skipped: {err}");
                self.set_status(Some(format!("Fit skipped: {err}")), true);
            }
        }
    }

    pub fn set_status(&mut self, message: Option<String>, is_error: bool) {
        self.status_message = message;
        self.status_is_error = is_error;
    }
}
