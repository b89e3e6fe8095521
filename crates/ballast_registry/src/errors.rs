use thiserror;

use ballast_core::{
    BlobError, DistributionErrorCode, Error as CoreError, ManifestError, RepositoryError, TagError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("storage driver error: {0}")]
    Driver(#[from] ballast_driver::Error),

    #[error("notification error: {0}")]
    Events(#[from] ballast_events::Error),

    #[error("link file serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            Error::Core(e) => e.code(),
            Error::Blob(e) => e.code(),
            Error::Manifest(e) => e.code(),
            Error::Tag(e) => e.code(),
            Error::Repository(e) => e.code(),
            Error::Driver(_) | Error::Events(_) | Error::Json(_) => {
                DistributionErrorCode::Unknown
            }
        }
    }
}
