//! Resumable blob upload state machine.
//!
//! A session lives under `_uploads/<uuid>/` in its repository: the appended
//! bytes in `data`, the creation time in `startedat`, and a digest-state
//! record per committed chunk under `hashstates/`. Each successful chunk is
//! persisted before it is acknowledged, so a session survives process
//! restarts; the offset is always recovered from the driver-visible bytes.
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use ballast_core::{
    BlobError, Descriptor, DigestState, Digester, OciDigest, RepositoryName, OCTET_STREAM,
};
use ballast_driver::StorageDriver;
use ballast_events::Listener;

use super::cache::BlobDescriptorCache;
use super::errors::Result;
use super::link::write_link;
use super::paths;

type TryBytes = std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// An in-progress upload. Obtained from
/// [`BlobStore::create`](super::blobs::BlobStore::create) or resumed via
/// [`BlobStore::resume`](super::blobs::BlobStore::resume).
///
/// Writes to one session must be serialized by the client; the offset after
/// interleaved writes is undefined and detectable overlap is rejected.
pub struct BlobUpload {
    driver: Arc<dyn StorageDriver>,
    cache: BlobDescriptorCache,
    repository: RepositoryName,
    listener: Listener,

    id: Uuid,
    offset: u64,
    started_at: DateTime<Utc>,
    digester: Digester,
    closed: bool,
}

impl std::fmt::Debug for BlobUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobUpload")
            .field("repository", &self.repository)
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("started_at", &self.started_at)
            .field("closed", &self.closed)
            .finish()
    }
}

impl BlobUpload {
    pub(crate) async fn start(
        driver: Arc<dyn StorageDriver>,
        cache: BlobDescriptorCache,
        repository: RepositoryName,
        listener: Listener,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        driver
            .put_content(
                &paths::upload_started_at_path(&repository, &id),
                Bytes::from(started_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            )
            .await?;
        tracing::debug!("started upload session {id} in {repository}");
        Ok(Self {
            driver,
            cache,
            repository,
            listener,
            id,
            offset: 0,
            started_at,
            digester: Digester::default(),
            closed: false,
        })
    }

    pub(crate) async fn resume(
        driver: Arc<dyn StorageDriver>,
        cache: BlobDescriptorCache,
        repository: RepositoryName,
        listener: Listener,
        id: Uuid,
    ) -> Result<Self> {
        let started_at_raw = match driver
            .get_content(&paths::upload_started_at_path(&repository, &id))
            .await
        {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(BlobError::UploadUnknown.into()),
            Err(e) => return Err(e.into()),
        };
        let started_at = std::str::from_utf8(&started_at_raw)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| BlobError::UploadInvalid("corrupt startedat record".to_string()))?;

        let mut upload = Self {
            driver,
            cache,
            repository,
            listener,
            id,
            offset: 0,
            started_at,
            digester: Digester::default(),
            closed: false,
        };

        // the driver-visible bytes are authoritative for the offset; the
        // digest state is rebuilt by replaying them
        let data_path = paths::upload_data_path(&upload.repository, &id);
        match upload.driver.stat(&data_path).await {
            Ok(info) => {
                let mut stream = upload.driver.reader(&data_path, 0).await?;
                while let Some(chunk) = stream.next().await {
                    upload.digester.update(&chunk?);
                }
                upload.offset = info.size;
                debug_assert_eq!(upload.digester.bytes(), upload.offset);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Ok(upload)
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Bytes durably stored so far; the next chunk must start here.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn started_at(&self) -> &DateTime<Utc> {
        &self.started_at
    }

    /// Append one chunk.
    ///
    /// When `expected_start` is given (from a `Content-Range` header) it
    /// must equal the current offset. The chunk is all-or-nothing: on any
    /// failure the stored bytes and the offset are unchanged and the session
    /// remains resumable.
    pub async fn write_chunk(
        &mut self,
        expected_start: Option<u64>,
        mut body: BoxStream<'_, TryBytes>,
    ) -> Result<u64> {
        if self.closed {
            return Err(BlobError::UploadClosed.into());
        }
        if let Some(start) = expected_start {
            if start != self.offset {
                return Err(BlobError::RangeInvalid {
                    expected: self.offset,
                }
                .into());
            }
        }

        let data_path = paths::upload_data_path(&self.repository, &self.id);
        let mut writer = self.driver.writer(&data_path, true).await?;
        if writer.size() != self.offset {
            // someone else wrote to this session behind our back
            writer.close().await.ok();
            return Err(BlobError::UploadInvalid(
                "concurrent writes to upload session detected".to_string(),
            )
            .into());
        }

        // stage chunks so the digester only advances once the whole chunk
        // is durable
        let mut staged: Vec<Bytes> = Vec::new();
        while let Some(item) = body.next().await {
            match item {
                Ok(bytes) => {
                    if let Err(e) = writer.write(bytes.clone()).await {
                        writer.cancel().await.ok();
                        writer.close().await.ok();
                        return Err(e.into());
                    }
                    staged.push(bytes);
                }
                Err(e) => {
                    writer.cancel().await.ok();
                    writer.close().await.ok();
                    return Err(
                        BlobError::UploadInvalid(format!("upload body error: {e}")).into(),
                    );
                }
            }
        }

        if let Err(e) = writer.commit().await {
            writer.cancel().await.ok();
            writer.close().await.ok();
            return Err(e.into());
        }
        writer.close().await?;

        for bytes in &staged {
            self.digester.update(bytes);
        }
        self.offset = self.digester.bytes();
        self.persist_hash_state().await;

        tracing::debug!(
            "upload session {} at offset {} after chunk",
            self.id,
            self.offset,
        );
        Ok(self.offset)
    }

    /// Convenience for callers holding the whole chunk in memory.
    pub async fn write_bytes(&mut self, bytes: Bytes) -> Result<u64> {
        let stream = futures::stream::iter(vec![Ok(bytes)]);
        self.write_chunk(None, stream.boxed()).await
    }

    // Advisory record of digester progress; the session stays resumable
    // without it, so failures only warn.
    async fn persist_hash_state(&self) {
        let state = DigestState::from(&self.digester);
        let path = paths::upload_hash_state_path(
            &self.repository,
            &self.id,
            self.digester.algorithm().as_str(),
            self.offset,
        );
        let payload = match serde_json::to_vec(&state) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to serialize digest state for {}: {e}", self.id);
                return;
            }
        };
        if let Err(e) = self.driver.put_content(&path, Bytes::from(payload)).await {
            tracing::warn!("failed to persist digest state for {}: {e}", self.id);
        }
    }

    /// Verify the supplied digest against the uploaded bytes and, on match,
    /// move them into the global blob store and link them into the
    /// repository.
    ///
    /// On mismatch the session remains open and resumable.
    pub async fn commit(&mut self, provided: &OciDigest) -> Result<Descriptor> {
        if self.closed {
            return Err(BlobError::UploadClosed.into());
        }

        // the algorithm of the verification digest is the one the client
        // supplied; fall back to re-reading the stored bytes when it is not
        // the algorithm we hashed incrementally
        let actual = if provided.algorithm() == &self.digester.algorithm() {
            self.digester.peek()
        } else {
            self.rehash(provided).await?
        };
        if &actual != provided {
            return Err(BlobError::DigestMismatch {
                provided: provided.clone(),
                actual,
            }
            .into());
        }

        let data_path = paths::upload_data_path(&self.repository, &self.id);
        let target_path = paths::blob_data_path(provided);
        match self.driver.stat(&target_path).await {
            // already stored: uploads of known content deduplicate
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if self.offset == 0 {
                    self.driver.put_content(&target_path, Bytes::new()).await?;
                } else {
                    self.driver.rename(&data_path, &target_path).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }

        write_link(
            self.driver.as_ref(),
            &paths::layer_link_path(&self.repository, provided),
            provided,
        )
        .await?;

        // session scaffolding is no longer needed
        if let Err(e) = self
            .driver
            .delete(&paths::upload_path(&self.repository, &self.id))
            .await
        {
            if !e.is_not_found() {
                tracing::warn!("failed to scrub upload session {}: {e}", self.id);
            }
        }
        self.closed = true;

        let descriptor = Descriptor::new(OCTET_STREAM, provided.clone(), self.offset);
        if let Err(e) = self
            .cache
            .repository(&self.repository)
            .set_descriptor(provided, &descriptor)
        {
            tracing::warn!("failed to cache descriptor for {provided}: {e}");
        }
        self.listener.blob_pushed(&descriptor).await;

        tracing::debug!(
            "upload session {} committed as {provided} ({} bytes)",
            self.id,
            self.offset,
        );
        Ok(descriptor)
    }

    async fn rehash(&self, provided: &OciDigest) -> Result<OciDigest> {
        let mut digester = provided.digester();
        let data_path = paths::upload_data_path(&self.repository, &self.id);
        match self.driver.reader(&data_path, 0).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    digester.update(&chunk?);
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(digester.finalize())
    }

    /// Drop the session and all of its state.
    pub async fn cancel(mut self) -> Result<()> {
        match self
            .driver
            .delete(&paths::upload_path(&self.repository, &self.id))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.closed = true;
        Ok(())
    }
}
