use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while bridging requests to the local store
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A value had the wrong shape for the requested tree operation,
    /// e.g. a non-object written to the document root.
    #[error("{message}")]
    TypeMismatch { message: String },

    #[error("Unsupported op: {op}")]
    UnsupportedOperation { op: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }
}
