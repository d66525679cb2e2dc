use providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("inference queue full: {capacity} requests already waiting")]
    QueueFull { capacity: usize },
    #[error("clustering requires at least {required} files with embeddings, found {found}")]
    InsufficientFiles { required: usize, found: usize },
    #[error("invalid cluster count: {0}")]
    InvalidClusterCount(String),
    #[error("Model mismatch: expected {expected}, got {actual}")]
    ModelMismatch { expected: String, actual: String },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding service is shut down")]
    ShutDown,
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl CoreError {
    /// Stable machine-readable code for callers that branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::QueueFull { .. } => "QUEUE_FULL",
            CoreError::InsufficientFiles { .. } => "INSUFFICIENT_FILES",
            CoreError::InvalidClusterCount(_) => "INVALID_CLUSTER_COUNT",
            CoreError::ModelMismatch { .. } => "MODEL_MISMATCH",
            CoreError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            CoreError::ShutDown => "SHUT_DOWN",
            CoreError::Timeout(_) => "TIMEOUT",
            CoreError::Cancelled => "CANCELLED",
            CoreError::Provider(_) => "PROVIDER_ERROR",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
