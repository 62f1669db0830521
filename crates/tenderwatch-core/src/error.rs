use thiserror::Error;

use crate::mirror::MirrorError;
use crate::source::SourceError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("chat transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("announcement source error: {0}")]
    Source(#[from] SourceError),

    #[error("mirror sync failed: {0}")]
    Mirror(#[from] MirrorError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
