use thiserror::Error;

/// Error type for analysis operations
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Invalid call arguments (e.g., empty sample set, too few samples, empty name list)
    #[error("ArgumentError: {0}")]
    ArgumentError(String),
    /// Model training/prediction errors
    #[error("ModelError: {0}")]
    ModelError(String),
    /// The run was cancelled or its deadline passed
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// Model bundle encoding/decoding errors
    #[error("SerializationError: {0}")]
    Serialization(String),
    /// File access errors
    #[error("IoError: {0}")]
    Io(String),
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        AnalysisError::Io(e.to_string())
    }
}
