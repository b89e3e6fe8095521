//! Narrow interface over a hierarchical key → bytes namespace.
//!
//! Every storage backend implements [`StorageDriver`] and nothing more; the
//! registry layers in [`ballast_registry`] are written entirely against this
//! trait. The filesystem reference implementation lives in
//! [`filesystem::FilesystemDriver`].
use std::path::Component;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;

pub mod config;
pub mod errors;
pub mod filesystem;

#[doc(hidden)]
pub use config::Config;
#[doc(hidden)]
pub use errors::{Error, KeyError, Result};

/// Wrapper around [`std::path::PathBuf`] that can reject unsavory key names.
///
/// The following rules are applied during the [`TryFrom<PathBuf>`]
/// implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths must not contain relative segments (ie `.` or `..`)
/// * path segments may only contain characters safe for every supported
///   backend
///
/// Users are allowed to break these rules at their own risk by using the
/// less restrictive [`Key::from_pathbuf()`] method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    key: PathBuf,
}

impl Key {
    /// For users who know the keys they will be passing to [`StorageDriver`]
    /// methods are safe for their intended backend.
    ///
    /// This method skips all validation checks and so is less
    /// computationally costly but also may result in backend API errors. To
    /// signify to consumers of this library that the value may possibly be
    /// bad even though no checks are performed here, this method returns a
    /// [`std::result::Result`] that happens to always be
    /// [`std::result::Result::Ok<Key>`].
    pub fn from_pathbuf(key: PathBuf) -> Result<Key> {
        Ok(Key { key })
    }

    pub fn join(&self, segment: impl AsRef<str>) -> Key {
        Key {
            key: self.key.join(segment.as_ref()),
        }
    }

    pub fn as_pathbuf(&self) -> &PathBuf {
        &self.key
    }
}

impl From<&uuid::Uuid> for Key {
    fn from(uuid: &uuid::Uuid) -> Key {
        Key {
            key: PathBuf::from(uuid.to_string()),
        }
    }
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        Ok(Key { key })
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(s: &str) -> Result<Key> {
        Key::try_from(PathBuf::from(s))
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.\-*'()!=]+$").unwrap());
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

/// Metadata of a stored file or directory.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

/// What a [`StorageDriver::walk`] callback wants done next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkDecision {
    Continue,
    /// Do not descend into the directory just visited. Ignored for files.
    SkipDir,
    /// Halt the walk entirely.
    Stop,
}

#[doc(hidden)]
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Provides a common interface for interacting with different kinds of
/// backend stores.
///
/// Retrieval methods return [`futures::stream::Stream`]s over
/// [`bytes::Bytes`]; uploads go through [`FileWriter`]s obtained from
/// [`StorageDriver::writer`].
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Identifies the backend in logs and errors, eg `"filesystem"`.
    fn name(&self) -> &'static str;

    /// Get the entire contents stored at `path`.
    async fn get_content(&self, path: &Key) -> Result<Bytes>;

    /// Atomically replace the entire contents at `path`.
    async fn put_content(&self, path: &Key, content: Bytes) -> Result<()>;

    /// Stream the contents at `path` starting from byte `offset`.
    async fn reader(&self, path: &Key, offset: u64) -> Result<ByteStream>;

    /// Open a [`FileWriter`] at `path`. With `append` the writer resumes
    /// from the current size of an existing path; without it any existing
    /// content is replaced.
    async fn writer(&self, path: &Key, append: bool) -> Result<Box<dyn FileWriter>>;

    /// Return metadata for `path`.
    async fn stat(&self, path: &Key) -> Result<FileInfo>;

    /// Return the immediate children of `path`, as full driver-relative
    /// paths in lexicographic order.
    async fn list(&self, path: &Key) -> Result<Vec<String>>;

    /// Atomically move `from` to `to`; the source is removed.
    async fn rename(&self, from: &Key, to: &Key) -> Result<()>;

    /// Recursively delete `path`.
    async fn delete(&self, path: &Key) -> Result<()>;

    /// Depth-first traversal of everything under `path`. The callback runs
    /// for every entry and steers the walk via [`WalkDecision`].
    async fn walk(
        &self,
        path: &Key,
        f: &mut (dyn for<'b> FnMut(&'b FileInfo) -> WalkDecision + Send),
    ) -> Result<()>;

    /// URL from which clients may fetch `path` directly, for backends able
    /// to serve presigned content. `None` when unsupported.
    async fn redirect_url(&self, method: &http::Method, path: &Key) -> Result<Option<String>> {
        let (_, _) = (method, path);
        Ok(None)
    }
}

/// Append-only handle for writing a file through a driver.
///
/// Exactly one of [`FileWriter::commit`] or [`FileWriter::cancel`] should be
/// called before [`FileWriter::close`]; closing an unfinished writer cancels
/// it.
#[async_trait]
pub trait FileWriter: Send {
    /// Append `data`, returning the number of bytes written.
    async fn write(&mut self, data: Bytes) -> Result<usize>;

    /// Total size of the file so far, the resumed portion included.
    fn size(&self) -> u64;

    /// Make all writes durable and visible at the target path. Further
    /// writes fail.
    async fn commit(&mut self) -> Result<()>;

    /// Discard all writes made through this writer, leaving no observable
    /// side effect at the target path.
    async fn cancel(&mut self) -> Result<()>;

    /// Release resources held by the writer.
    async fn close(&mut self) -> Result<()>;
}
