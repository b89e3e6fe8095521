use once_cell::sync::Lazy;
use regex::Regex;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Error, Result};
use crate::oci_digest::OciDigest;

// https://github.com/opencontainers/distribution-spec/blob/main/spec.md#pulling-manifests
static REPOSITORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap());

/// Validated repository name, the `<name>` in endpoints like
/// `/v2/<name>/blobs/<digest>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryName(String);

impl std::str::FromStr for RepositoryName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !REPOSITORY_RE.is_match(s) {
            return Err(Error::InvalidRepositoryName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl RepositoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RepositoryName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RepositoryName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Validated tag name: `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`, anchored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName(String);

impl std::str::FromStr for TagName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !TAG_RE.is_match(s) {
            return Err(Error::InvalidTagName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TagName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a manifest as it appears in `/v2/<name>/manifests/<reference>`:
/// either the digest of the manifest or a tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestRef {
    Digest(OciDigest),
    Tag(TagName),
}

impl std::str::FromStr for ManifestRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(dgst) = OciDigest::try_from(s) {
            return Ok(Self::Digest(dgst));
        }
        if let Ok(tag) = s.parse::<TagName>() {
            return Ok(Self::Tag(tag));
        }
        Err(Error::InvalidManifestReference(s.to_string()))
    }
}

impl std::fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ManifestRef::Digest(d) => write!(f, "{d}"),
            ManifestRef::Tag(t) => write!(f, "{t}"),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::simple("library", true)]
    #[case::nested("library/ubuntu", true)]
    #[case::dotted("test.example.com/uploadrepo", true)]
    #[case::separators("a-b/c_d/e.f", true)]
    #[case::uppercase("Library", false)]
    #[case::leading_separator("-library", false)]
    #[case::trailing_slash("library/", false)]
    #[case::empty("", false)]
    #[case::double_separator("a..b", false)]
    fn repository_names(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(input.parse::<RepositoryName>().is_ok(), ok, "{input}");
    }

    #[rstest]
    #[case::latest("latest", true)]
    #[case::version("v1.2.3-rc.1", true)]
    #[case::leading_underscore("_internal", true)]
    #[case::leading_dot(".hidden", false)]
    #[case::leading_dash("-x", false)]
    #[case::too_long(&"a".repeat(129), false)]
    #[case::max_length(&"a".repeat(128), true)]
    #[case::empty("", false)]
    fn tag_names(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(input.parse::<TagName>().is_ok(), ok, "{input}");
    }

    #[test]
    fn manifest_ref_prefers_digest() {
        let r: ManifestRef =
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                .parse()
                .unwrap();
        assert!(matches!(r, ManifestRef::Digest(_)));

        let r: ManifestRef = "latest".parse().unwrap();
        assert!(matches!(r, ManifestRef::Tag(_)));
    }
}
