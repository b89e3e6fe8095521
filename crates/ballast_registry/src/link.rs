//! Link files: the small files inside a repository namespace whose contents
//! are a digest string, establishing that the repository references a global
//! blob or manifest.
use bytes::Bytes;

use ballast_core::{Error as CoreError, OciDigest};
use ballast_driver::{Key, StorageDriver};

use super::errors::Result;

/// Read and parse a link file. `None` when the link does not exist.
pub(crate) async fn read_link(
    driver: &dyn StorageDriver,
    path: &Key,
) -> Result<Option<OciDigest>> {
    let content = match driver.get_content(path).await {
        Ok(content) => content,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let s = std::str::from_utf8(&content)
        .map_err(|_| CoreError::InvalidDigest(format!("corrupt link file at {path}")))?;
    let digest = OciDigest::try_from(s.trim())?;
    Ok(Some(digest))
}

/// Write a link file. Idempotent: rewriting the same digest is harmless, and
/// the driver's `put_content` makes replacement atomic.
pub(crate) async fn write_link(
    driver: &dyn StorageDriver,
    path: &Key,
    digest: &OciDigest,
) -> Result<()> {
    driver
        .put_content(path, Bytes::from(String::from(digest)))
        .await?;
    Ok(())
}
