//! Two-scope blob descriptor cache.
//!
//! One underlying cache holds both scopes, keyed by `(repo, digest)` with
//! `repo = ""` for the global scope. The cache only accelerates `stat`: a
//! miss or a stale hit always falls through to the driver-backed stores, so
//! entries are never treated as authoritative for existence.
use ballast_core::{Descriptor, Error as CoreError, OciDigest, RepositoryName};

const GLOBAL_SCOPE: &str = "";

#[derive(Clone)]
pub struct BlobDescriptorCache {
    cache: moka::sync::Cache<(String, String), Descriptor>,
}

impl BlobDescriptorCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: moka::sync::Cache::new(max_capacity),
        }
    }

    pub fn global(&self) -> DescriptorCacheScope {
        DescriptorCacheScope {
            cache: self.clone(),
            scope: GLOBAL_SCOPE.to_string(),
        }
    }

    pub fn repository(&self, repo: &RepositoryName) -> DescriptorCacheScope {
        DescriptorCacheScope {
            cache: self.clone(),
            scope: repo.as_str().to_string(),
        }
    }
}

/// View of the cache bound to one scope (a repository, or the global one).
#[derive(Clone)]
pub struct DescriptorCacheScope {
    cache: BlobDescriptorCache,
    scope: String,
}

impl DescriptorCacheScope {
    pub fn stat(&self, digest: &OciDigest) -> Option<Descriptor> {
        self.cache
            .cache
            .get(&(self.scope.clone(), String::from(digest)))
    }

    /// Insert a descriptor for `digest`.
    ///
    /// The descriptor's digest must equal `digest` or differ from it only in
    /// algorithm; in the latter case both mappings are recorded. Setting a
    /// repository-scoped entry also populates the global scope, never the
    /// other way around.
    pub fn set_descriptor(
        &self,
        digest: &OciDigest,
        desc: &Descriptor,
    ) -> std::result::Result<(), CoreError> {
        if desc.media_type.is_empty() {
            return Err(CoreError::InvalidDigest(
                "descriptor has no media type".to_string(),
            ));
        }
        if &desc.digest != digest && desc.digest.algorithm() == digest.algorithm() {
            return Err(CoreError::InvalidDigest(format!(
                "descriptor digest {} does not correspond to key {digest}",
                desc.digest,
            )));
        }

        self.insert(digest, desc);
        if &desc.digest != digest {
            // differs in algorithm only: record the canonical mapping too
            self.insert(&desc.digest, desc);
        }
        Ok(())
    }

    fn insert(&self, digest: &OciDigest, desc: &Descriptor) {
        self.cache
            .cache
            .insert((self.scope.clone(), String::from(digest)), desc.clone());
        if self.scope != GLOBAL_SCOPE {
            self.cache
                .cache
                .insert((GLOBAL_SCOPE.to_string(), String::from(digest)), desc.clone());
        }
    }

    pub fn clear(&self, digest: &OciDigest) {
        self.cache
            .cache
            .invalidate(&(self.scope.clone(), String::from(digest)));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ballast_core::OCTET_STREAM;

    fn digest(data: &[u8]) -> OciDigest {
        OciDigest::from(data)
    }

    fn repo(name: &str) -> RepositoryName {
        name.parse().unwrap()
    }

    #[test]
    fn repo_scope_populates_global_but_not_other_repos() {
        let cache = BlobDescriptorCache::new(128);
        let d = digest(b"blob");
        let desc = Descriptor::new(OCTET_STREAM, d.clone(), 4);

        cache
            .repository(&repo("repo-a"))
            .set_descriptor(&d, &desc)
            .unwrap();

        assert!(cache.repository(&repo("repo-a")).stat(&d).is_some());
        assert!(cache.global().stat(&d).is_some());
        assert!(cache.repository(&repo("repo-b")).stat(&d).is_none());
    }

    #[test]
    fn global_scope_does_not_populate_repos() {
        let cache = BlobDescriptorCache::new(128);
        let d = digest(b"blob");
        let desc = Descriptor::new(OCTET_STREAM, d.clone(), 4);

        cache.global().set_descriptor(&d, &desc).unwrap();
        assert!(cache.global().stat(&d).is_some());
        assert!(cache.repository(&repo("repo-a")).stat(&d).is_none());
    }

    #[test]
    fn rejects_mismatched_digest() {
        let cache = BlobDescriptorCache::new(128);
        let desc = Descriptor::new(OCTET_STREAM, digest(b"other"), 5);
        assert!(cache.global().set_descriptor(&digest(b"blob"), &desc).is_err());
    }

    #[test]
    fn rejects_descriptor_without_media_type() {
        let cache = BlobDescriptorCache::new(128);
        let d = digest(b"blob");
        let desc = Descriptor::new("", d.clone(), 4);
        assert!(cache.global().set_descriptor(&d, &desc).is_err());
    }

    #[test]
    fn clear_is_scoped() {
        let cache = BlobDescriptorCache::new(128);
        let d = digest(b"blob");
        let desc = Descriptor::new(OCTET_STREAM, d.clone(), 4);
        cache
            .repository(&repo("repo-a"))
            .set_descriptor(&d, &desc)
            .unwrap();

        cache.repository(&repo("repo-a")).clear(&d);
        assert!(cache.repository(&repo("repo-a")).stat(&d).is_none());
        assert!(cache.global().stat(&d).is_some());
    }
}
