use thiserror::Error;

use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("not found: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum Error {
    /// Bytes are not a supported raster image.
    #[error("image could not be decoded: {0}")]
    Decode(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Caller misuse, rejected before any work starts.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
