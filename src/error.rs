use thiserror::Error;

/// Guidance engine error types
#[derive(Error, Debug)]
pub enum GuidanceError {
    #[error("No destination selected")]
    NoDestination,

    #[error("A guidance session is already active")]
    SessionActive,

    #[error("Entry check not resolved")]
    CalibrationPending,

    #[error("No calibration in progress")]
    NotCalibrating,

    #[error("Invalid coordinate: lat={latitude}, lon={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Analytics error: {0}")]
    Analytics(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for guidance operations
pub type Result<T> = std::result::Result<T, GuidanceError>;

impl From<reqwest::Error> for GuidanceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GuidanceError::Analytics("Network timeout".to_string())
        } else {
            GuidanceError::Analytics(err.to_string())
        }
    }
}
