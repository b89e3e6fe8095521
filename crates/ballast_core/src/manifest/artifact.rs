use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;

use super::media_type;
use super::Manifest;
use crate::descriptor::Descriptor;
use crate::errors::ManifestError;

#[derive(Deserialize)]
struct ArtifactManifestSchema {
    // required: an artifact manifest is only recognizable by its media type
    #[serde(rename = "mediaType")]
    media_type: String,
    #[serde(rename = "artifactType")]
    artifact_type: String,
    #[serde(default)]
    blobs: Vec<Descriptor>,
    #[serde(default)]
    subject: Option<Descriptor>,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
}

/// OCI artifact manifest: arbitrary typed content attached to zero or more
/// blobs and optionally referring to a subject manifest.
#[derive(Clone, Debug)]
pub struct ArtifactManifest {
    media_type: String,
    pub artifact_type: String,
    pub blobs: Vec<Descriptor>,
    pub subject: Option<Descriptor>,
    pub annotations: Option<HashMap<String, String>>,
    canonical: Bytes,
}

impl ArtifactManifest {
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn canonical(&self) -> &Bytes {
        &self.canonical
    }
}

pub(super) fn unmarshal(bytes: Bytes) -> Result<Manifest, ManifestError> {
    let schema: ArtifactManifestSchema =
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::Invalid(e.to_string()))?;

    if schema.media_type != media_type::ARTIFACT_MANIFEST {
        return Err(ManifestError::Invalid(format!(
            "mediaType {} is not the artifact manifest type",
            schema.media_type
        )));
    }

    // the subject must name a manifest; its existence is not checked here
    // nor at put time
    if let Some(subject) = &schema.subject {
        if !media_type::is_manifest(&subject.media_type) {
            return Err(ManifestError::Invalid(format!(
                "artifact subject mediaType {} is not a manifest type",
                subject.media_type
            )));
        }
    }

    Ok(Manifest::Artifact(ArtifactManifest {
        media_type: schema.media_type,
        artifact_type: schema.artifact_type,
        blobs: schema.blobs,
        subject: schema.subject,
        annotations: schema.annotations,
        canonical: bytes,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oci_digest::OciDigest;

    fn blob_descriptor(data: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "mediaType": "application/vnd.example.sbom.v1+json",
            "digest": String::from(&OciDigest::from(data)),
            "size": data.len(),
        })
    }

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "mediaType": media_type::ARTIFACT_MANIFEST,
            "artifactType": "application/vnd.example.sbom.v1",
            "blobs": [blob_descriptor(b"sbom-data")],
        })
    }

    fn unmarshal_value(v: &serde_json::Value) -> Result<Manifest, ManifestError> {
        unmarshal(Bytes::from(serde_json::to_vec(v).unwrap()))
    }

    #[test]
    fn accepts_minimal_artifact() {
        let m = unmarshal_value(&minimal()).unwrap();
        assert_eq!(m.artifact_type(), Some("application/vnd.example.sbom.v1"));
        assert_eq!(m.dependencies().len(), 1);
    }

    #[test]
    fn requires_media_type_field() {
        let mut v = minimal();
        v.as_object_mut().unwrap().remove("mediaType");
        assert!(unmarshal_value(&v).is_err());
    }

    #[test]
    fn requires_artifact_type_field() {
        let mut v = minimal();
        v.as_object_mut().unwrap().remove("artifactType");
        assert!(unmarshal_value(&v).is_err());
    }

    #[test]
    fn subject_must_be_a_manifest_type() {
        let mut v = minimal();
        v["subject"] = blob_descriptor(b"not-a-manifest");
        assert!(unmarshal_value(&v).is_err());

        let mut subject = blob_descriptor(b"a-manifest");
        subject["mediaType"] = serde_json::json!(media_type::IMAGE_MANIFEST);
        v["subject"] = subject;
        let m = unmarshal_value(&v).unwrap();
        assert!(m.subject().is_some());
        // present in references, absent from dependencies
        assert_eq!(m.references().len(), 2);
        assert_eq!(m.dependencies().len(), 1);
    }
}
