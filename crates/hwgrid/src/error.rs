use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Catalog error: {0}")]
    Database(String),
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl From<toml::de::Error> for AllocError {
    fn from(e: toml::de::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<String> for AllocError {
    fn from(e: String) -> Self {
        Self::Validation(e)
    }
}
