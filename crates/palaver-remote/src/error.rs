use thiserror::Error;

/// Errors produced by a [`RemoteGateway`](crate::RemoteGateway).
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The remote store could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The request was rejected for the current credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A uniqueness or shape constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Record not found")]
    NotFound,

    /// A row did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The gateway or subscription channel has shut down.
    #[error("Channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RemoteError>;
