//! Driver-relative path layout.
//!
//! The storage backend layout is broken up into a content-addressable blob
//! store and repositories:
//!
//! ```text
//! docker/registry/v2/
//!   blobs/<algo>/<first-2-hex>/<full-hex>/data
//!   repositories/<repo>/
//!     _layers/<algo>/<full-hex>/link
//!     _manifests/revisions/<algo>/<full-hex>/link
//!     _manifests/tags/<tag>/current/link
//!     _manifests/tags/<tag>/index/<algo>/<full-hex>/link
//!     _uploads/<uuid>/data
//!     _uploads/<uuid>/startedat
//!     _uploads/<uuid>/hashstates/<algo>/<offset>
//! ```
//!
//! The blob store holds all bulk data, keyed by digest of the underlying
//! content; repositories gain access to it through link files carrying a
//! digest string.
use std::path::PathBuf;

use uuid::Uuid;

use ballast_core::{OciDigest, RepositoryName, TagName};
use ballast_driver::Key;

const ROOT: &str = "docker/registry/v2";

fn key(s: String) -> Key {
    Key::from_pathbuf(PathBuf::from(s)).expect("layout paths are always valid keys")
}

pub fn repositories_path() -> Key {
    key(format!("{ROOT}/repositories"))
}

pub fn repository_path(repo: &RepositoryName) -> Key {
    key(format!("{ROOT}/repositories/{repo}"))
}

pub fn blob_path(digest: &OciDigest) -> Key {
    let algo = digest.algorithm().as_str();
    let hex = digest.encoded();
    key(format!("{ROOT}/blobs/{algo}/{}/{hex}", &hex[..2]))
}

pub fn blob_data_path(digest: &OciDigest) -> Key {
    blob_path(digest).join("data")
}

pub fn layer_path(repo: &RepositoryName, digest: &OciDigest) -> Key {
    key(format!(
        "{ROOT}/repositories/{repo}/_layers/{}/{}",
        digest.algorithm().as_str(),
        digest.encoded(),
    ))
}

pub fn layer_link_path(repo: &RepositoryName, digest: &OciDigest) -> Key {
    layer_path(repo, digest).join("link")
}

pub fn manifest_revision_path(repo: &RepositoryName, digest: &OciDigest) -> Key {
    key(format!(
        "{ROOT}/repositories/{repo}/_manifests/revisions/{}/{}",
        digest.algorithm().as_str(),
        digest.encoded(),
    ))
}

pub fn manifest_revision_link_path(repo: &RepositoryName, digest: &OciDigest) -> Key {
    manifest_revision_path(repo, digest).join("link")
}

pub fn tags_path(repo: &RepositoryName) -> Key {
    key(format!("{ROOT}/repositories/{repo}/_manifests/tags"))
}

pub fn tag_path(repo: &RepositoryName, tag: &TagName) -> Key {
    tags_path(repo).join(tag.as_str())
}

pub fn tag_current_path(repo: &RepositoryName, tag: &TagName) -> Key {
    tag_path(repo, tag).join("current")
}

pub fn tag_current_link_path(repo: &RepositoryName, tag: &TagName) -> Key {
    tag_current_path(repo, tag).join("link")
}

pub fn tag_index_path(repo: &RepositoryName, tag: &TagName) -> Key {
    tag_path(repo, tag).join("index")
}

pub fn tag_index_link_path(repo: &RepositoryName, tag: &TagName, digest: &OciDigest) -> Key {
    tag_index_path(repo, tag)
        .join(digest.algorithm().as_str())
        .join(digest.encoded())
        .join("link")
}

pub fn uploads_path(repo: &RepositoryName) -> Key {
    key(format!("{ROOT}/repositories/{repo}/_uploads"))
}

pub fn upload_path(repo: &RepositoryName, id: &Uuid) -> Key {
    uploads_path(repo).join(id.to_string())
}

pub fn upload_data_path(repo: &RepositoryName, id: &Uuid) -> Key {
    upload_path(repo, id).join("data")
}

pub fn upload_started_at_path(repo: &RepositoryName, id: &Uuid) -> Key {
    upload_path(repo, id).join("startedat")
}

pub fn upload_hash_states_path(repo: &RepositoryName, id: &Uuid, algo: &str) -> Key {
    upload_path(repo, id).join("hashstates").join(algo)
}

pub fn upload_hash_state_path(repo: &RepositoryName, id: &Uuid, algo: &str, offset: u64) -> Key {
    upload_hash_states_path(repo, id, algo).join(offset.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    const DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn blob_paths_shard_on_hex_prefix() {
        let d: OciDigest = DIGEST.try_into().unwrap();
        assert_eq!(
            String::from(&blob_data_path(&d)),
            "docker/registry/v2/blobs/sha256/e3/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855/data",
        );
    }

    #[test]
    fn repository_scoped_paths() {
        let d: OciDigest = DIGEST.try_into().unwrap();
        let repo: RepositoryName = "test.example.com/uploadrepo".parse().unwrap();
        let tag: TagName = "latest".parse().unwrap();
        assert_eq!(
            String::from(&layer_link_path(&repo, &d)),
            "docker/registry/v2/repositories/test.example.com/uploadrepo/_layers/sha256/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855/link",
        );
        assert_eq!(
            String::from(&tag_current_link_path(&repo, &tag)),
            "docker/registry/v2/repositories/test.example.com/uploadrepo/_manifests/tags/latest/current/link",
        );
    }
}
