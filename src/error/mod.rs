mod from;

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("`{0}` is not an absolute path")]
    PathNotAbsolute(PathBuf),

    #[error("bucket name `{0}` contains a path separator")]
    InvalidBucketName(String),

    #[error("no bucket named `{0}`")]
    BucketNotFound(String),

    #[error("region lookup for bucket `{0}` timed out")]
    RegionLookupTimedOut(String),

    #[error("`{0}` must be set")]
    MissingEnvVar(String),

    #[error("upload of `{0}` timed out")]
    UploadTimedOut(PathBuf),

    #[error("upload of `{0}` was cancelled")]
    UploadCancelled(PathBuf),

    #[error("uploaded object `{0}` failed its existence check")]
    VerificationFailed(String),

    #[error("service `{0}` is disposed")]
    ServiceDisposed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] rusqlite::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(error.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(error)
    }
}
