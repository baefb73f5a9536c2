//! Error types for GarudaSoar

use thiserror::Error;

/// GarudaSoar error type
#[derive(Error, Debug)]
pub enum SoarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polygon error: {0}")]
    Polygon(String),

    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Runtime fault: {0}")]
    Fault(String),
}

pub type Result<T> = std::result::Result<T, SoarError>;
