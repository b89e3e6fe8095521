use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;

use super::media_type;
use super::Manifest;
use crate::descriptor::Descriptor;
use crate::errors::ManifestError;

/// Raw serde shape. The `manifests` guard field exists only to reject image
/// index payloads pushed under an image manifest media type.
#[derive(Deserialize)]
struct ImageManifestSchema {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    config: Descriptor,
    layers: Vec<Descriptor>,
    #[serde(default)]
    subject: Option<Descriptor>,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
    #[serde(rename = "artifactType", default)]
    artifact_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
}

/// Single-image manifest: a config blob plus ordered layer blobs.
#[derive(Clone, Debug)]
pub struct ImageManifest {
    media_type: String,
    pub schema_version: u32,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub subject: Option<Descriptor>,
    pub annotations: Option<HashMap<String, String>>,
    pub artifact_type: Option<String>,

    // config first, then layers in manifest order
    pub(super) dependencies: Vec<Descriptor>,
    canonical: Bytes,
}

impl ImageManifest {
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn canonical(&self) -> &Bytes {
        &self.canonical
    }
}

pub(super) fn unmarshal(bytes: Bytes) -> Result<Manifest, ManifestError> {
    let schema: ImageManifestSchema =
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::Invalid(e.to_string()))?;

    if schema.manifests.is_some() {
        return Err(ManifestError::Invalid(
            "image manifest must not contain a manifests list".to_string(),
        ));
    }
    if schema.schema_version != 2 {
        return Err(ManifestError::Invalid(format!(
            "unsupported manifest schemaVersion: {}",
            schema.schema_version
        )));
    }

    let media_type = schema
        .media_type
        .unwrap_or_else(|| media_type::IMAGE_MANIFEST.to_string());
    if media_type != media_type::IMAGE_MANIFEST && media_type != media_type::DOCKER_MANIFEST {
        return Err(ManifestError::Invalid(format!(
            "mediaType {media_type} is not an image manifest type"
        )));
    }

    let mut dependencies = Vec::with_capacity(schema.layers.len() + 1);
    dependencies.push(schema.config.clone());
    dependencies.extend(schema.layers.iter().cloned());

    Ok(Manifest::Image(ImageManifest {
        media_type,
        schema_version: schema.schema_version,
        config: schema.config,
        layers: schema.layers,
        subject: schema.subject,
        annotations: schema.annotations,
        artifact_type: schema.artifact_type,
        dependencies,
        canonical: bytes,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oci_digest::OciDigest;

    fn descriptor(media_type: &str, data: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "mediaType": media_type,
            "digest": String::from(&OciDigest::from(data)),
            "size": data.len(),
        })
    }

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::IMAGE_MANIFEST,
            "config": descriptor(media_type::IMAGE_CONFIG, b"cfg"),
            "layers": [descriptor(media_type::IMAGE_LAYER, b"layer")],
        })
    }

    fn unmarshal_value(v: &serde_json::Value) -> Result<Manifest, ManifestError> {
        unmarshal(Bytes::from(serde_json::to_vec(v).unwrap()))
    }

    #[test]
    fn accepts_minimal_manifest() {
        let m = unmarshal_value(&minimal()).unwrap();
        let Manifest::Image(m) = m else {
            panic!("expected image manifest")
        };
        assert_eq!(m.layers.len(), 1);
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.dependencies[0], m.config);
    }

    #[test]
    fn rejects_embedded_manifest_list() {
        let mut v = minimal();
        v["manifests"] = serde_json::json!([]);
        let err = unmarshal_value(&v).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)), "{err}");
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let mut v = minimal();
        v["schemaVersion"] = serde_json::json!(1);
        assert!(unmarshal_value(&v).is_err());
    }

    #[test]
    fn rejects_index_media_type() {
        let mut v = minimal();
        v["mediaType"] = serde_json::json!(media_type::IMAGE_INDEX);
        assert!(unmarshal_value(&v).is_err());
    }

    #[test]
    fn accepts_docker_schema2() {
        let mut v = minimal();
        v["mediaType"] = serde_json::json!(media_type::DOCKER_MANIFEST);
        let m = unmarshal_value(&v).unwrap();
        assert_eq!(m.media_type(), media_type::DOCKER_MANIFEST);
    }

    #[test]
    fn subject_is_not_a_dependency() {
        let mut v = minimal();
        v["subject"] = descriptor(media_type::IMAGE_MANIFEST, b"parent");
        let m = unmarshal_value(&v).unwrap();
        assert_eq!(m.dependencies().len(), 2);
        assert_eq!(m.references().len(), 3);
    }
}
