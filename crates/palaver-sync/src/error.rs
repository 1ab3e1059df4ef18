use thiserror::Error;

use palaver_remote::RemoteError;
use palaver_store::StoreError;

/// Errors surfaced by the sync layer.
///
/// Most read and merge paths swallow these after logging; they reach the
/// caller only from user-initiated actions that cannot proceed at all.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// An operation needing a session ran while logged out.
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username already taken: {0}")]
    UsernameTaken(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
