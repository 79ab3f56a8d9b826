use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No compatible columns in table '{0}'")]
    NoCompatibleColumns(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Table store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl BridgeError {
    /// Failures raised before any engine is touched.
    pub fn is_request_failure(&self) -> bool {
        matches!(self, BridgeError::InvalidInput(_) | BridgeError::PermissionDenied(_))
    }
}

impl From<polars::error::PolarsError> for BridgeError {
    fn from(err: polars::error::PolarsError) -> Self {
        BridgeError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
