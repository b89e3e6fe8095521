//! Tag index: mutable mapping from tag names to manifest digests, with a
//! retained history of every digest a tag has ever pointed at.
use std::sync::Arc;

use ballast_core::{Descriptor, OciDigest, RepositoryName, TagError, TagName};
use ballast_driver::StorageDriver;
use ballast_events::Listener;

use super::errors::Result;
use super::link::{read_link, write_link};
use super::paths;

pub struct TagStore {
    driver: Arc<dyn StorageDriver>,
    repository: RepositoryName,
    listener: Listener,
}

impl TagStore {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        repository: RepositoryName,
        listener: Listener,
    ) -> Self {
        Self {
            driver,
            repository,
            listener,
        }
    }

    /// Point `tag` at the manifest named by `desc`, recording the
    /// assignment in the tag's history index. Last writer wins; the
    /// driver's atomic `put_content` is the linearization point.
    pub async fn tag(&self, tag: &TagName, desc: &Descriptor) -> Result<()> {
        let previous = self.set_current(tag, desc).await?;
        if let Some(previous) = previous {
            if previous != desc.digest {
                self.listener
                    .manifest_pushed(desc, Some(tag), Vec::new())
                    .await;
            }
        }
        Ok(())
    }

    /// The link writes behind [`TagStore::tag`], shared with the manifest
    /// store so a tagged manifest put emits a single push event. Returns the
    /// previous current digest.
    pub(crate) async fn set_current(
        &self,
        tag: &TagName,
        desc: &Descriptor,
    ) -> Result<Option<OciDigest>> {
        let current_link = paths::tag_current_link_path(&self.repository, tag);
        let previous = read_link(self.driver.as_ref(), &current_link).await?;

        write_link(self.driver.as_ref(), &current_link, &desc.digest).await?;
        write_link(
            self.driver.as_ref(),
            &paths::tag_index_link_path(&self.repository, tag, &desc.digest),
            &desc.digest,
        )
        .await?;
        Ok(previous)
    }

    /// Resolve `tag` to the descriptor of its current manifest.
    pub async fn get(&self, tag: &TagName) -> Result<Descriptor> {
        let digest = read_link(
            self.driver.as_ref(),
            &paths::tag_current_link_path(&self.repository, tag),
        )
        .await?
        .ok_or_else(|| TagError::Unknown(tag.to_string()))?;

        // size comes from the stored canonical bytes; the media type is the
        // manifest store's to assert when the bytes are actually read
        let size = match self.driver.stat(&paths::blob_data_path(&digest)).await {
            Ok(info) => info.size,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Descriptor::new(
            ballast_core::OCTET_STREAM,
            digest,
            size,
        ))
    }

    /// Remove the tag's current assignment. The history index is retained.
    pub async fn untag(&self, tag: &TagName) -> Result<()> {
        let current_link = paths::tag_current_link_path(&self.repository, tag);
        let current = read_link(self.driver.as_ref(), &current_link)
            .await?
            .ok_or_else(|| TagError::Unknown(tag.to_string()))?;

        self.driver
            .delete(&paths::tag_current_path(&self.repository, tag))
            .await?;
        self.listener.tag_deleted(tag, Some(&current)).await;
        Ok(())
    }

    /// All tag names in this repository, lexicographically ordered.
    ///
    /// Untagged entries whose directory only holds retained history are not
    /// listed.
    pub async fn all(&self) -> Result<Vec<TagName>> {
        let children = match self.driver.list(&paths::tags_path(&self.repository)).await {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tags = Vec::with_capacity(children.len());
        for child in children {
            let name = child.rsplit('/').next().unwrap_or(&child);
            let tag = match name.parse::<TagName>() {
                Ok(tag) => tag,
                Err(_) => {
                    tracing::warn!("skipping invalid tag directory: {child}");
                    continue;
                }
            };
            let current = paths::tag_current_link_path(&self.repository, &tag);
            if read_link(self.driver.as_ref(), &current).await?.is_some() {
                tags.push(tag);
            }
        }
        // driver listing is already sorted, parsing preserved the order
        Ok(tags)
    }

    /// Reverse lookup: every tag whose current assignment is `desc`.
    pub async fn lookup(&self, desc: &Descriptor) -> Result<Vec<TagName>> {
        let mut tags = Vec::new();
        for tag in self.all().await? {
            let current = read_link(
                self.driver.as_ref(),
                &paths::tag_current_link_path(&self.repository, &tag),
            )
            .await?;
            if current.as_ref() == Some(&desc.digest) {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    /// Every digest `tag` has ever been assigned to, from the history
    /// index. Order is stable but unspecified.
    pub async fn manifest_digests(&self, tag: &TagName) -> Result<Vec<OciDigest>> {
        let index_path = paths::tag_index_path(&self.repository, tag);
        let algos = match self.driver.list(&index_path).await {
            Ok(algos) => algos,
            Err(e) if e.is_not_found() => {
                return Err(TagError::Unknown(tag.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut digests = Vec::new();
        for algo_path in algos {
            let algo = algo_path.rsplit('/').next().unwrap_or(&algo_path).to_string();
            for hex_path in self
                .driver
                .list(&index_path.join(&algo))
                .await?
            {
                let hex = hex_path.rsplit('/').next().unwrap_or(&hex_path);
                match OciDigest::try_from(format!("{algo}:{hex}").as_str()) {
                    Ok(digest) => digests.push(digest),
                    Err(_) => tracing::warn!("skipping corrupt tag index entry: {hex_path}"),
                }
            }
        }
        Ok(digests)
    }
}
