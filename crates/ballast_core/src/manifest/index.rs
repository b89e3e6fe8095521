use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;

use super::media_type;
use super::Manifest;
use crate::descriptor::Descriptor;
use crate::errors::ManifestError;

/// Raw serde shape. `config`/`layers` guard fields reject image manifest
/// payloads pushed under an index media type.
#[derive(Deserialize)]
struct ImageIndexSchema {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    manifests: Vec<Descriptor>,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
    #[serde(default)]
    config: Option<serde_json::Value>,
    #[serde(default)]
    layers: Option<serde_json::Value>,
}

/// Multi-arch image index: a list of per-platform manifest descriptors.
#[derive(Clone, Debug)]
pub struct ImageIndex {
    media_type: String,
    pub schema_version: u32,
    pub manifests: Vec<Descriptor>,
    pub annotations: Option<HashMap<String, String>>,
    canonical: Bytes,
}

impl ImageIndex {
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn canonical(&self) -> &Bytes {
        &self.canonical
    }
}

pub(super) fn unmarshal(bytes: Bytes) -> Result<Manifest, ManifestError> {
    let schema: ImageIndexSchema =
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::Invalid(e.to_string()))?;

    if schema.config.is_some() || schema.layers.is_some() {
        return Err(ManifestError::Invalid(
            "image index must not contain config or layers".to_string(),
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
        .unwrap_or_else(|| media_type::IMAGE_INDEX.to_string());
    if media_type != media_type::IMAGE_INDEX && media_type != media_type::DOCKER_MANIFEST_LIST {
        return Err(ManifestError::Invalid(format!(
            "mediaType {media_type} is not an image index type"
        )));
    }

    Ok(Manifest::Index(ImageIndex {
        media_type,
        schema_version: schema.schema_version,
        manifests: schema.manifests,
        annotations: schema.annotations,
        canonical: bytes,
    }))
}
