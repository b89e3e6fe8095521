use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::oci_digest::OciDigest;

/// Content type of raw blobs whose media type was never asserted by a
/// referring manifest.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// The atomic unit of reference between manifests, and between manifests and
/// blobs.
///
/// Descriptors are value-typed snapshots; they may be copied freely and never
/// own the content they describe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: OciDigest,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(
        rename = "artifactType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_type: Option<String>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: OciDigest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: None,
            annotations: None,
            platform: None,
            artifact_type: None,
        }
    }
}

/// Runtime requirements of the image a descriptor points at, used by index
/// manifests to pick a platform-specific manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,

    pub os: String,

    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(
        rename = "os.features",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_features: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            os_features: None,
            variant: None,
        }
    }

    /// Platform match for index dependency filtering: version, features and
    /// variant are only compared when the filter specifies them.
    pub fn matches(&self, other: &Platform) -> bool {
        if self.architecture != other.architecture || self.os != other.os {
            return false;
        }
        if let Some(v) = &self.variant {
            if other.variant.as_ref() != Some(v) {
                return false;
            }
        }
        if let Some(v) = &self.os_version {
            if other.os_version.as_ref() != Some(v) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.architecture, v),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const LAYER_DIGEST: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn serializes_without_empty_optionals() {
        let d = Descriptor::new(
            "application/vnd.oci.image.layer.v1.tar+gzip",
            LAYER_DIGEST.try_into().unwrap(),
            1024,
        );
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": LAYER_DIGEST,
                "size": 1024,
            })
        );
    }

    #[test]
    fn platform_field_names() {
        let p: Platform = serde_json::from_value(serde_json::json!({
            "architecture": "arm64",
            "os": "linux",
            "os.version": "6.1",
            "variant": "v8",
        }))
        .unwrap();
        assert_eq!(p.os_version.as_deref(), Some("6.1"));
        assert_eq!(format!("{p}"), "linux/arm64/v8");
    }

    #[test]
    fn platform_matching() {
        let filter = Platform::new("amd64", "linux");
        let mut candidate = Platform::new("amd64", "linux");
        candidate.os_version = Some("6.1".to_string());
        assert!(filter.matches(&candidate));
        assert!(!filter.matches(&Platform::new("arm64", "linux")));
    }
}
