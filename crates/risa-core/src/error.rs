use thiserror::Error;

/// Top-level error type for the reconstruction engine.
#[derive(Debug, Error)]
pub enum RisaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("calibration error: {0}")]
    Calibration(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("memory pool error: {0}")]
    Pool(String),

    #[error("receiver error: {0}")]
    Receiver(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RisaError>;
