use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Permission denied: {0}")]
    NoPermissions(String),

    #[error("Remote version changed: {0}")]
    VersionConflict(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Remote error: {0}")]
    RemoteFailure(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Json(err.to_string())
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::Io(err)
    }
}

/// Errors reported by a remote backend.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The supplied etag no longer matches the server's version.
    #[error("Precondition failed for {0}")]
    PreconditionFailed(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Remote resource already exists: {0}")]
    AlreadyExists(String),

    #[error("The '{0}' operation is not implemented by this backend")]
    Unsupported(&'static str),

    #[error("{0}")]
    Failure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

impl From<RemoteError> for MirrorError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::PreconditionFailed(path) => MirrorError::VersionConflict(path),
            RemoteError::NotFound(path) => MirrorError::NotFound(path),
            RemoteError::AlreadyExists(path) => MirrorError::AlreadyExists(path),
            RemoteError::Unsupported(op) => MirrorError::UnsupportedOperation(op.to_string()),
            RemoteError::Failure(msg) => MirrorError::RemoteFailure(msg),
            RemoteError::Io(e) => MirrorError::RemoteFailure(e.to_string()),
        }
    }
}
