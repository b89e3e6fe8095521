//! Repository-scoped blob store over the content-addressed layout.
//!
//! Blob bytes live once per digest in the global store; a repository gains
//! access through a link file. Deleting a blob from a repository removes the
//! link only; reclaiming unreferenced global blobs is a garbage-collection
//! concern outside the request path.
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use ballast_core::{BlobError, Descriptor, OciDigest, RepositoryName, OCTET_STREAM};
use ballast_driver::StorageDriver;
use ballast_events::Listener;

use super::cache::BlobDescriptorCache;
use super::errors::Result;
use super::link::{read_link, write_link};
use super::paths;
use super::upload::BlobUpload;

pub type BlobBody = BoxStream<'static, std::result::Result<Bytes, ballast_driver::Error>>;

/// Outcome of [`BlobStore::create`]: either a fresh upload session, or a
/// completed cross-repository mount with no session opened at all.
pub enum BlobCreate {
    Session(BlobUpload),
    Mounted {
        from: RepositoryName,
        descriptor: Descriptor,
    },
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Attempt a cross-repository mount of `digest` out of `from` before
    /// falling back to a normal upload session.
    pub mount_from: Option<(RepositoryName, OciDigest)>,
}

pub struct BlobStore {
    driver: Arc<dyn StorageDriver>,
    cache: BlobDescriptorCache,
    repository: RepositoryName,
    listener: Listener,
}

impl BlobStore {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        cache: BlobDescriptorCache,
        repository: RepositoryName,
        listener: Listener,
    ) -> Self {
        Self {
            driver,
            cache,
            repository,
            listener,
        }
    }

    /// Descriptor for `digest` if it is linked into this repository.
    pub async fn stat(&self, digest: &OciDigest) -> Result<Descriptor> {
        if let Some(desc) = self.cache.repository(&self.repository).stat(digest) {
            return Ok(desc);
        }

        let linked = read_link(
            self.driver.as_ref(),
            &paths::layer_link_path(&self.repository, digest),
        )
        .await?
        .ok_or_else(|| BlobError::Unknown(digest.clone()))?;

        let info = match self.driver.stat(&paths::blob_data_path(&linked)).await {
            Ok(info) => info,
            // dangling link: the cache must not learn it either
            Err(e) if e.is_not_found() => return Err(BlobError::Unknown(digest.clone()).into()),
            Err(e) => return Err(e.into()),
        };

        let desc = Descriptor::new(OCTET_STREAM, linked, info.size);
        if let Err(e) = self
            .cache
            .repository(&self.repository)
            .set_descriptor(digest, &desc)
        {
            tracing::warn!("failed to cache descriptor for {digest}: {e}");
        }
        Ok(desc)
    }

    pub async fn exists(&self, digest: &OciDigest) -> Result<bool> {
        match self.stat(digest).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.code(), ballast_core::DistributionErrorCode::BlobUnknown) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Open the blob for reading.
    pub async fn get(&self, digest: &OciDigest) -> Result<(Descriptor, BlobBody)> {
        let desc = self.stat(digest).await?;
        let stream = self
            .driver
            .reader(&paths::blob_data_path(&desc.digest), 0)
            .await?;
        self.listener.blob_pulled(&desc).await;
        Ok((desc, stream))
    }

    /// Presigned URL for direct client fetch, when the driver supports it.
    pub async fn redirect_url(
        &self,
        method: &http::Method,
        digest: &OciDigest,
    ) -> Result<Option<String>> {
        let desc = self.stat(digest).await?;
        Ok(self
            .driver
            .redirect_url(method, &paths::blob_data_path(&desc.digest))
            .await?)
    }

    /// Convenience whole-body upload: create a session, write everything,
    /// commit under the computed digest.
    pub async fn put(&self, media_type: &str, bytes: Bytes) -> Result<Descriptor> {
        let digest = OciDigest::from(bytes.as_ref());
        let mut upload = self.create_session().await?;
        if !bytes.is_empty() {
            upload.write_bytes(bytes).await?;
        }
        let mut desc = upload.commit(&digest).await?;
        desc.media_type = media_type.to_string();
        Ok(desc)
    }

    /// Start an upload, or complete a cross-repository mount when requested
    /// and the source repository has the blob linked.
    pub async fn create(&self, opts: CreateOptions) -> Result<BlobCreate> {
        if let Some((from, digest)) = opts.mount_from {
            match self.mount(&from, &digest).await? {
                Some(descriptor) => return Ok(BlobCreate::Mounted { from, descriptor }),
                None => {
                    tracing::debug!(
                        "mount of {digest} from {from} not possible, opening upload session",
                    );
                }
            }
        }
        Ok(BlobCreate::Session(self.create_session().await?))
    }

    async fn create_session(&self) -> Result<BlobUpload> {
        BlobUpload::start(
            self.driver.clone(),
            self.cache.clone(),
            self.repository.clone(),
            self.listener.clone(),
        )
        .await
    }

    /// Resume an existing upload session.
    pub async fn resume(&self, id: uuid::Uuid) -> Result<BlobUpload> {
        BlobUpload::resume(
            self.driver.clone(),
            self.cache.clone(),
            self.repository.clone(),
            self.listener.clone(),
            id,
        )
        .await
    }

    // Install a link to an existing global blob that `from` already links.
    // Both links point at the shared bytes; deleting one never affects the
    // other.
    async fn mount(
        &self,
        from: &RepositoryName,
        digest: &OciDigest,
    ) -> Result<Option<Descriptor>> {
        let linked = match read_link(
            self.driver.as_ref(),
            &paths::layer_link_path(from, digest),
        )
        .await?
        {
            Some(linked) => linked,
            None => return Ok(None),
        };

        let info = match self.driver.stat(&paths::blob_data_path(&linked)).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        write_link(
            self.driver.as_ref(),
            &paths::layer_link_path(&self.repository, digest),
            &linked,
        )
        .await?;

        let desc = Descriptor::new(OCTET_STREAM, linked, info.size);
        if let Err(e) = self
            .cache
            .repository(&self.repository)
            .set_descriptor(digest, &desc)
        {
            tracing::warn!("failed to cache descriptor for {digest}: {e}");
        }
        self.listener.blob_mounted(&desc, from.as_str()).await;
        Ok(Some(desc))
    }

    /// Remove this repository's link to `digest`. The global bytes stay in
    /// place for any other repository linking them.
    pub async fn delete(&self, digest: &OciDigest) -> Result<()> {
        let link_path = paths::layer_link_path(&self.repository, digest);
        if read_link(self.driver.as_ref(), &link_path).await?.is_none() {
            return Err(BlobError::Unknown(digest.clone()).into());
        }
        self.driver
            .delete(&paths::layer_path(&self.repository, digest))
            .await?;
        self.cache.repository(&self.repository).clear(digest);
        self.listener.blob_deleted(digest).await;
        Ok(())
    }
}
