//! Manifest store: canonical-bytes storage keyed by digest, with put-time
//! verification that everything a manifest references is already present in
//! the repository.
use std::sync::Arc;

use ballast_core::{
    unmarshal_manifest, Descriptor, Manifest, ManifestError, ManifestRef, ManifestVerification,
    OciDigest, Platform, RepositoryName, TagName, VerificationError,
};
use ballast_driver::StorageDriver;
use ballast_events::Listener;

use super::errors::Result;
use super::link::{read_link, write_link};
use super::paths;
use super::tags::TagStore;

/// Knobs for index dependency verification.
#[derive(Clone, Debug, Default)]
pub struct IndexValidation {
    /// Verify that every manifest an index references exists in the
    /// repository.
    pub validate_image_indexes: bool,
    /// When non-empty, only references whose platform matches one of these
    /// entries are required to exist.
    pub platforms: Vec<Platform>,
}

#[derive(Clone, Debug, Default)]
pub struct ManifestPutOptions {
    /// Also point this tag at the stored manifest.
    pub tag: Option<TagName>,
    /// Trust the client and skip reference existence checks entirely.
    pub skip_dependency_verification: bool,
}

pub struct ManifestStore {
    driver: Arc<dyn StorageDriver>,
    repository: RepositoryName,
    tags: TagStore,
    listener: Listener,
    index_validation: IndexValidation,
}

impl ManifestStore {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        repository: RepositoryName,
        tags: TagStore,
        listener: Listener,
        index_validation: IndexValidation,
    ) -> Self {
        Self {
            driver,
            repository,
            tags,
            listener,
            index_validation,
        }
    }

    /// Store a manifest under the digest of its canonical bytes.
    pub async fn put(&self, manifest: &Manifest, opts: ManifestPutOptions) -> Result<Descriptor> {
        if !opts.skip_dependency_verification {
            let verification = self.verify_dependencies(manifest).await?;
            if !verification.is_empty() {
                return Err(ManifestError::Verification(verification).into());
            }
        }

        let descriptor = manifest.descriptor();
        let digest = &descriptor.digest;

        let data_path = paths::blob_data_path(digest);
        match self.driver.stat(&data_path).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                self.driver
                    .put_content(&data_path, manifest.canonical().clone())
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
        write_link(
            self.driver.as_ref(),
            &paths::manifest_revision_link_path(&self.repository, digest),
            digest,
        )
        .await?;

        if let Some(tag) = &opts.tag {
            self.tags.set_current(tag, &descriptor).await?;
        }

        self.listener
            .manifest_pushed(&descriptor, opts.tag.as_ref(), manifest.references())
            .await;
        tracing::debug!("stored manifest {digest} in {}", self.repository);
        Ok(descriptor)
    }

    // All dependencies are checked before reporting so a client learns every
    // missing reference at once.
    async fn verify_dependencies(&self, manifest: &Manifest) -> Result<ManifestVerification> {
        let mut verification = ManifestVerification::default();
        match manifest {
            Manifest::Image(_) | Manifest::Artifact(_) => {
                for dep in manifest.dependencies() {
                    if !self.blob_linked(&dep.digest).await? {
                        verification.push(VerificationError::BlobUnknown(dep.digest.clone()));
                    }
                }
            }
            Manifest::Index(index) => {
                if !self.index_validation.validate_image_indexes {
                    return Ok(verification);
                }
                for dep in &index.manifests {
                    if !self.platform_required(dep) {
                        continue;
                    }
                    if !self.revision_exists(&dep.digest).await? {
                        verification.push(VerificationError::ManifestUnknown(dep.digest.clone()));
                    }
                }
            }
        }
        Ok(verification)
    }

    fn platform_required(&self, dep: &Descriptor) -> bool {
        if self.index_validation.platforms.is_empty() {
            return true;
        }
        match &dep.platform {
            Some(platform) => self
                .index_validation
                .platforms
                .iter()
                .any(|filter| filter.matches(platform)),
            None => false,
        }
    }

    async fn blob_linked(&self, digest: &OciDigest) -> Result<bool> {
        Ok(read_link(
            self.driver.as_ref(),
            &paths::layer_link_path(&self.repository, digest),
        )
        .await?
        .is_some())
    }

    async fn revision_exists(&self, digest: &OciDigest) -> Result<bool> {
        Ok(read_link(
            self.driver.as_ref(),
            &paths::manifest_revision_link_path(&self.repository, digest),
        )
        .await?
        .is_some())
    }

    async fn resolve(&self, reference: &ManifestRef) -> Result<OciDigest> {
        match reference {
            ManifestRef::Digest(digest) => Ok(digest.clone()),
            ManifestRef::Tag(tag) => Ok(self.tags.get(tag).await?.digest),
        }
    }

    /// Fetch a manifest by tag or digest, unmarshalled from its canonical
    /// bytes.
    pub async fn get(&self, reference: &ManifestRef) -> Result<(Manifest, Descriptor)> {
        let digest = self.resolve(reference).await?;

        if !self.revision_exists(&digest).await? {
            return Err(ManifestError::Unknown.into());
        }
        let bytes = match self.driver.get_content(&paths::blob_data_path(&digest)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Err(ManifestError::Unknown.into()),
            Err(e) => return Err(e.into()),
        };

        let (manifest, descriptor) = unmarshal_manifest(None, bytes)?;
        self.listener.manifest_pulled(&descriptor).await;
        Ok((manifest, descriptor))
    }

    /// HEAD-equivalent: true without unmarshalling anything.
    pub async fn exists(&self, reference: &ManifestRef) -> Result<bool> {
        let digest = match reference {
            ManifestRef::Digest(digest) => digest.clone(),
            ManifestRef::Tag(tag) => match self.tags.get(tag).await {
                Ok(desc) => desc.digest,
                Err(e) if matches!(e, super::errors::Error::Tag(_)) => return Ok(false),
                Err(e) => return Err(e),
            },
        };
        self.revision_exists(&digest).await
    }

    /// Remove the repository's revision link for `digest`.
    ///
    /// Tags pointing at the digest are left in place and dangle; operators
    /// untag first when that matters.
    pub async fn delete(&self, digest: &OciDigest) -> Result<()> {
        if !self.revision_exists(digest).await? {
            return Err(ManifestError::Unknown.into());
        }
        self.driver
            .delete(&paths::manifest_revision_path(&self.repository, digest))
            .await?;
        self.listener.manifest_deleted(digest).await;
        Ok(())
    }
}
