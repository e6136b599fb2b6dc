// for error definitions
use thiserror::Error;

/// Errors surfaced by the admission-control core.
///
/// A rate-limit denial is not an error: it is reported as a
/// [`Decision`](crate::Decision) with `allowed == false`.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Invalid or missing configuration, including unknown policy scopes
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to a counter backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Metric registration or encoding failures
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The backend did not answer within its deadline
    #[error("Storage operation timed out: {0}")]
    Timeout(String),
}

impl AdmissionError {
    /// True when the error came from a counter backend rather than from configuration
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, AdmissionError::Storage(_))
    }
}

impl From<redis::RedisError> for AdmissionError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                AdmissionError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                AdmissionError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => AdmissionError::Storage(StorageError::RedisCommand(err.to_string())),
        }
    }
}

// policy tables are the only JSON this crate parses
impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::Config(format!("invalid policy table: {}", err))
    }
}

impl From<prometheus::Error> for AdmissionError {
    fn from(err: prometheus::Error) -> Self {
        AdmissionError::Metrics(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, AdmissionError>;
