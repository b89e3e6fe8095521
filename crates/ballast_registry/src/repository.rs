//! Registry entry point and per-repository façade.
//!
//! A [`Repository`] is a cheap coordinator: it carries no state beyond its
//! name and handles to the shared driver, cache, and event bridge.
//! Independent repositories may be used in parallel, and within one
//! repository the blob, manifest, and tag stores touch disjoint paths.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use ballast_core::{Platform, RepositoryError, RepositoryName};
use ballast_driver::{StorageDriver, WalkDecision};
use ballast_events::{Actor, Bridge, Listener, RequestRecord};

use super::blobs::BlobStore;
use super::cache::BlobDescriptorCache;
use super::errors::Result;
use super::manifests::{IndexValidation, ManifestStore};
use super::paths;
use super::tags::TagStore;

#[derive(Clone, Debug, Deserialize)]
pub struct RegistryOptions {
    #[serde(default = "default_validate_image_indexes")]
    pub validate_image_indexes: bool,
    #[serde(default)]
    pub index_platforms: Vec<Platform>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_validate_image_indexes() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            validate_image_indexes: default_validate_image_indexes(),
            index_platforms: Vec::new(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// One registry instance, authoritative over a single storage driver.
#[derive(Clone)]
pub struct Registry {
    driver: Arc<dyn StorageDriver>,
    cache: BlobDescriptorCache,
    bridge: Arc<Bridge>,
    options: RegistryOptions,
}

impl Registry {
    pub fn new(driver: Arc<dyn StorageDriver>, bridge: Bridge, options: RegistryOptions) -> Self {
        Self {
            driver,
            cache: BlobDescriptorCache::new(options.cache_capacity),
            bridge: Arc::new(bridge),
            options,
        }
    }

    /// Repository façade bound to `name`, with anonymous request context.
    pub fn repository(&self, name: &str) -> Result<Repository> {
        self.repository_with_context(name, Actor::default(), RequestRecord::default())
    }

    /// Repository façade carrying the actor and request that events should
    /// record.
    pub fn repository_with_context(
        &self,
        name: &str,
        actor: Actor,
        request: RequestRecord,
    ) -> Result<Repository> {
        let name: RepositoryName = name.parse()?;
        let listener = self.bridge.listener(name.as_str(), actor, request);
        Ok(Repository {
            name,
            driver: self.driver.clone(),
            cache: self.cache.clone(),
            listener,
            index_validation: IndexValidation {
                validate_image_indexes: self.options.validate_image_indexes,
                platforms: self.options.index_platforms.clone(),
            },
        })
    }

    /// Lexicographic repository catalog, resuming after `last` and bounded
    /// by `n`.
    pub async fn repositories(
        &self,
        n: Option<usize>,
        last: Option<&str>,
    ) -> Result<Vec<String>> {
        let root = paths::repositories_path();
        let prefix = format!("{}/", String::from(&root));

        let mut found: Vec<String> = Vec::new();
        let walk_result = self
            .driver
            .walk(&root, &mut |info| {
                if !info.is_dir {
                    return WalkDecision::Continue;
                }
                let rel = match info.path.strip_prefix(&prefix) {
                    Some(rel) => rel,
                    None => return WalkDecision::Continue,
                };
                let base = rel.rsplit('/').next().unwrap_or(rel);
                if base.starts_with('_') {
                    // content directories mark their parent as a repository
                    if matches!(base, "_layers" | "_manifests" | "_uploads") {
                        if let Some(repo) = rel.rsplit_once('/').map(|(parent, _)| parent) {
                            found.push(repo.to_string());
                        }
                    }
                    return WalkDecision::SkipDir;
                }
                WalkDecision::Continue
            })
            .await;
        match walk_result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        found.sort();
        found.dedup();
        if let Some(last) = last {
            found.retain(|name| name.as_str() > last);
        }
        if let Some(n) = n {
            found.truncate(n);
        }
        Ok(found)
    }

    /// Remove a repository wholesale: links, tags, and upload scaffolding.
    /// Global blobs are untouched.
    pub async fn delete_repository(&self, name: &str) -> Result<()> {
        let name: RepositoryName = name.parse()?;
        match self.driver.delete(&paths::repository_path(&name)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(RepositoryError::Unknown(name.to_string()).into())
            }
            Err(e) => return Err(e.into()),
        }
        self.bridge
            .listener(name.as_str(), Actor::default(), RequestRecord::default())
            .repository_deleted()
            .await;
        Ok(())
    }

    /// Drop upload sessions started before `older_than` ago, completing the
    /// cancel-or-timeout end of the session lifecycle. Sessions whose
    /// `startedat` record is missing or unreadable count as stale.
    ///
    /// Returns the number of sessions removed. Intended to run from a
    /// maintenance task, not the request path.
    pub async fn purge_stale_uploads(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut purged = 0;

        for repo in self.repositories(None, None).await? {
            let name: RepositoryName = match repo.parse() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let sessions = match self.driver.list(&paths::uploads_path(&name)).await {
                Ok(sessions) => sessions,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            for session in sessions {
                let raw_id = session.rsplit('/').next().unwrap_or(&session);
                let Ok(id) = Uuid::parse_str(raw_id) else {
                    tracing::warn!("skipping malformed upload directory: {session}");
                    continue;
                };
                let started_at = self.upload_started_at(&name, &id).await?;
                let stale = match started_at {
                    Some(started_at) => started_at < cutoff,
                    None => true,
                };
                if !stale {
                    continue;
                }
                match self.driver.delete(&paths::upload_path(&name, &id)).await {
                    Ok(()) => purged += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if purged > 0 {
            tracing::info!("purged {purged} stale upload sessions");
        }
        Ok(purged)
    }

    async fn upload_started_at(
        &self,
        name: &RepositoryName,
        id: &Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let raw = match self
            .driver
            .get_content(&paths::upload_started_at_path(name, id))
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Flush and shut down the notification pipeline.
    pub async fn close(&self) {
        self.bridge.close().await;
    }
}

/// Blob, manifest, and tag access bound to one repository name.
pub struct Repository {
    name: RepositoryName,
    driver: Arc<dyn StorageDriver>,
    cache: BlobDescriptorCache,
    listener: Listener,
    index_validation: IndexValidation,
}

impl Repository {
    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(
            self.driver.clone(),
            self.cache.clone(),
            self.name.clone(),
            self.listener.clone(),
        )
    }

    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(
            self.driver.clone(),
            self.name.clone(),
            self.tags(),
            self.listener.clone(),
            self.index_validation.clone(),
        )
    }

    pub fn tags(&self) -> TagStore {
        TagStore::new(
            self.driver.clone(),
            self.name.clone(),
            self.listener.clone(),
        )
    }
}
