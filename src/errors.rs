use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for CamMeasure
#[derive(Error, Debug)]
pub enum CamMeasureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid input frame: {0}")]
    InvalidInput(String),

    #[error("Invalid calibration: pixels_per_mm must be > 0, got {0}")]
    InvalidCalibration(f64),

    #[error("Stage {stage} failed: {reason}")]
    StageFailed {
        stage: &'static str,
        reason: String,
    },

    #[error("Stage {stage} exceeded its budget of {budget_ms} ms")]
    StageTimeout {
        stage: &'static str,
        budget_ms: u64,
    },

    #[error("External detector {0} unavailable: {1}")]
    ExternalEngine(String, String),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    JsonOutput(#[from] serde_json::Error),

    #[error("No object found in frame")]
    NoObjectFound,

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Unexpected error: {0}")]
    Other(String),
}

impl CamMeasureError {
    /// Errors that abort a detection call outright. Every other variant lets
    /// the orchestrator degrade to its fallback path instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CamMeasureError::InvalidInput(_) | CamMeasureError::InvalidCalibration(_)
        )
    }
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, CamMeasureError>;
