use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EftemError, Result};
use crate::fit::PowerLawMode;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "eftemj.json";

/// Environment variable that overrides [`DEFAULT_CONFIG_FILE`].
pub const CONFIG_ENV_VAR: &str = "EFTEMJ_CONFIG";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Settings of the background fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Convergence limit on the change of the weighted RMS between iterations.
    pub epsilon: f64,
    /// Iteration cap of the solver. The default never stops a fit in practice.
    pub max_iterations: u32,
    /// Model preselected by the viewer.
    pub default_model: String,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            max_iterations: u32::MAX,
            default_model: "Power law function".to_string(),
        }
    }
}

/// Settings of the drift estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Largest shift (pixels) searched in each direction.
    pub delta: usize,
    /// Size of the correlation thread pool, 0 = one per core.
    pub threads: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            delta: 10,
            threads: 0,
        }
    }
}

/// Settings of the DQE measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqeConfig {
    pub sensitivity: f64,
    /// Pixels ignored on every side of the image.
    pub border: usize,
    /// Largest binning factor, 0 = automatic.
    pub max_binning: usize,
    /// Worker threads, 0 = one per core.
    pub workers: usize,
}

impl Default for DqeConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            border: 0,
            max_binning: 0,
            workers: 0,
        }
    }
}

/// Settings of the elemental-map calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Convergence limit of the per-pixel power-law fits.
    pub epsilon: f64,
    pub mode: PowerLawMode,
    /// Size of the fit thread pool, 0 = one per core.
    pub threads: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            mode: PowerLawMode::LogLog,
            threads: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// EftemConfig – the complete configuration file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EftemConfig {
    pub fit: FitConfig,
    pub drift: DriftConfig,
    pub dqe: DqeConfig,
    pub map: MapConfig,
}

impl EftemConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EftemError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EftemConfig =
            serde_json::from_str(&text).map_err(|source| EftemError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Like [`EftemConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| EftemError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| EftemError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fit.epsilon.is_finite() && self.fit.epsilon > 0.0) {
            return Err(EftemError::Config(format!(
                "fit.epsilon must be a positive number, got {}",
                self.fit.epsilon
            )));
        }
        if self.fit.max_iterations == 0 {
            return Err(EftemError::Config(
                "fit.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.map.epsilon.is_finite() && self.map.epsilon > 0.0) {
            return Err(EftemError::Config(format!(
                "map.epsilon must be a positive number, got {}",
                self.map.epsilon
            )));
        }
        if !self.dqe.sensitivity.is_finite() {
            return Err(EftemError::Config(format!(
                "dqe.sensitivity must be finite, got {}",
                self.dqe.sensitivity
            )));
        }
        Ok(())
    }
}

/// Resolve the configuration path: explicit argument, then the environment
/// variable, then [`DEFAULT_CONFIG_FILE`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Resolve the number of threads for a setting where 0 means "one per core".
pub fn thread_count(setting: usize) -> usize {
    if setting == 0 {
        num_cpus::get().max(1)
    } else {
        setting
    }
}
