use crate::model::Status;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetMemError>;

#[derive(Debug, Error)]
pub enum NetMemError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage timed out: {0}")]
    Timeout(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NetMemError {
    /// Status code reported to listeners for this failure.
    pub fn status(&self) -> Status {
        match self {
            NetMemError::InvalidArgument(_) => Status::InvalidArgument,
            NetMemError::NotFound(_) => Status::NotFound,
            NetMemError::Database(_)
            | NetMemError::Serialization(_)
            | NetMemError::Io(_)
            | NetMemError::Timeout(_)
            | NetMemError::Codec(_) => Status::IoFailure,
            NetMemError::Config(_) | NetMemError::Internal(_) => Status::Internal,
        }
    }
}
