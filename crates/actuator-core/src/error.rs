use thiserror::Error;

/// Top-level error type for the Actuator system.
///
/// Subsystem crates define their own error types and wrap this one with
/// `#[from]` so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActuatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ActuatorError {
    fn from(err: toml::de::Error) -> Self {
        ActuatorError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ActuatorError {
    fn from(err: toml::ser::Error) -> Self {
        ActuatorError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ActuatorError {
    fn from(err: serde_json::Error) -> Self {
        ActuatorError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Actuator operations.
pub type Result<T> = std::result::Result<T, ActuatorError>;
