use thiserror::Error;

use crate::error::SubmitError::GenericError;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Allocation error: {0}")]
    AllocError(#[from] hwgrid::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("No service is configured for board {0}")]
    UnknownBoard(String),
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<toml::de::Error> for SubmitError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<anyhow::Error> for SubmitError {
    fn from(error: anyhow::Error) -> Self {
        GenericError(error.to_string())
    }
}

impl From<String> for SubmitError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
