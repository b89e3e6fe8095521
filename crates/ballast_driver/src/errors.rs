use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("invalid offset {offset} for path: {path}")]
    InvalidOffset { path: String, offset: u64 },

    #[error("writer already finished for path: {path}")]
    WriterFinished { path: String },

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn from_io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::PathNotFound {
                path: path.to_string(),
            }
        } else {
            Error::Io {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PathNotFound { .. })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("path prefixes are not allowed in keys")]
    PrefixNotAllowed,
    #[error("absolute paths are not allowed in keys")]
    RootDirNotAllowed,
    #[error("'.' segments are not allowed in keys")]
    CurDirNotAllowed,
    #[error("'..' segments are not allowed in keys")]
    ParentDirNotAllowed,
    #[error("path components must match the regex: {0}")]
    PathComponentsMustMatchRegex(String),
    #[error("path components must be valid unicode")]
    PathComponentsMustBeValidUnicode,
}
