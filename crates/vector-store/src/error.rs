use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Binary codec error: {0}")]
    BincodeError(#[from] bincode::Error),

    #[error("Unsupported schema_version {found} (expected {expected})")]
    SchemaVersion { expected: u32, found: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}
