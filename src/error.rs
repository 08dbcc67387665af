use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the importers, the image helpers and the batch jobs.
///
/// Fit failures are deliberately absent: a fit that does not converge is a
/// [`FitOutcome`](crate::fit::fitter::FitOutcome), not an error.
#[derive(Debug, Error)]
pub enum EftemError {
    #[error("Failed to read file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse MSA file '{path}' at line {line}: {reason}")]
    MsaParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unsupported file extension: '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("Failed to decode image '{path}': {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to decode or encode TIFF '{path}': {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error(
        "Region {x},{y} {width}x{height} (grown by {delta}) does not fit into a \
         {image_width}x{image_height} image"
    )]
    InvalidRoi {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        delta: usize,
        image_width: usize,
        image_height: usize,
    },

    #[error("Template index {index} is outside of a stack with {len} images")]
    InvalidTemplate { index: usize, len: usize },

    #[error("Image {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("The image stack needs at least two images, got {len}")]
    EmptyStack { len: usize },

    #[error("Failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Elemental map needs at least two pre-edge images below {edge} eV, got {count}")]
    TooFewPreEdgeImages { edge: f64, count: usize },

    #[error("No post-edge image at or above {edge} eV")]
    NoPostEdgeImage { edge: f64 },

    #[error("Image {index} has an invalid energy loss of {energy_loss} eV")]
    InvalidEnergyLoss { index: usize, energy_loss: f64 },

    #[error("DQE workers stopped after {received} of {expected} results")]
    DqeWorkerLost { received: usize, expected: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write report: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EftemError>;
