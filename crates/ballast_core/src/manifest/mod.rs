//! Polymorphic manifest codec.
//!
//! A process-wide registry maps media-type strings to unmarshal functions.
//! The registry is populated once at startup and immutable afterwards;
//! registering the same media type twice is a programming error and panics.
//!
//! Every parsed manifest carries the exact bytes it was unmarshalled from.
//! Digests are taken over those canonical bytes, so re-serialization never
//! happens: [`Manifest::canonical`] returns the stored bytes verbatim.

use std::collections::HashMap;

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::descriptor::Descriptor;
use crate::errors::ManifestError;
use crate::oci_digest::OciDigest;

mod artifact;
mod image;
mod index;

pub use artifact::ArtifactManifest;
pub use image::ImageManifest;
pub use index::ImageIndex;

pub mod media_type {
    pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";
    pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    /// True if the media type names a manifest document rather than blob
    /// content. Artifact `subject` descriptors must satisfy this.
    pub fn is_manifest(mt: &str) -> bool {
        matches!(
            mt,
            IMAGE_MANIFEST | IMAGE_INDEX | ARTIFACT_MANIFEST | DOCKER_MANIFEST
                | DOCKER_MANIFEST_LIST
        )
    }
}

/// A parsed manifest together with its canonical bytes.
#[derive(Clone, Debug)]
pub enum Manifest {
    Image(ImageManifest),
    Index(ImageIndex),
    Artifact(ArtifactManifest),
}

impl Manifest {
    pub fn media_type(&self) -> &str {
        match self {
            Manifest::Image(m) => m.media_type(),
            Manifest::Index(m) => m.media_type(),
            Manifest::Artifact(m) => m.media_type(),
        }
    }

    pub fn artifact_type(&self) -> Option<&str> {
        match self {
            Manifest::Image(m) => m.artifact_type.as_deref(),
            Manifest::Index(_) => None,
            Manifest::Artifact(m) => Some(m.artifact_type.as_str()),
        }
    }

    pub fn subject(&self) -> Option<&Descriptor> {
        match self {
            Manifest::Image(m) => m.subject.as_ref(),
            Manifest::Index(_) => None,
            Manifest::Artifact(m) => m.subject.as_ref(),
        }
    }

    /// Every descriptor this manifest points at, the subject included.
    pub fn references(&self) -> Vec<Descriptor> {
        let mut refs = self.dependencies().to_vec();
        if let Some(subject) = self.subject() {
            refs.push(subject.clone());
        }
        refs
    }

    /// The descriptors whose targets must already exist in a repository
    /// before this manifest may be stored there. The subject is never a
    /// dependency: referrers may be pushed before the thing they refer to.
    pub fn dependencies(&self) -> &[Descriptor] {
        match self {
            Manifest::Image(m) => &m.dependencies,
            Manifest::Index(m) => &m.manifests,
            Manifest::Artifact(m) => &m.blobs,
        }
    }

    /// The exact bytes this manifest was unmarshalled from.
    pub fn canonical(&self) -> &Bytes {
        match self {
            Manifest::Image(m) => m.canonical(),
            Manifest::Index(m) => m.canonical(),
            Manifest::Artifact(m) => m.canonical(),
        }
    }

    /// Descriptor of this manifest itself: digest and size over the
    /// canonical bytes.
    pub fn descriptor(&self) -> Descriptor {
        let canonical = self.canonical();
        Descriptor::new(
            self.media_type(),
            OciDigest::from(canonical.as_ref()),
            canonical.len() as u64,
        )
    }
}

type UnmarshalFn = fn(Bytes) -> Result<Manifest, ManifestError>;

struct ManifestCodec {
    handlers: HashMap<&'static str, UnmarshalFn>,
    default_handler: Option<UnmarshalFn>,
}

impl ManifestCodec {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    fn register(&mut self, media_type: &'static str, f: UnmarshalFn) {
        if self.handlers.insert(media_type, f).is_some() {
            panic!("manifest media type registered twice: {media_type}");
        }
    }

    fn register_default(&mut self, f: UnmarshalFn) {
        if self.default_handler.is_some() {
            panic!("default manifest handler registered twice");
        }
        self.default_handler = Some(f);
    }
}

static CODEC: Lazy<ManifestCodec> = Lazy::new(|| {
    let mut codec = ManifestCodec::new();
    codec.register(media_type::IMAGE_MANIFEST, image::unmarshal);
    codec.register(media_type::DOCKER_MANIFEST, image::unmarshal);
    codec.register(media_type::IMAGE_INDEX, index::unmarshal);
    codec.register(media_type::DOCKER_MANIFEST_LIST, index::unmarshal);
    codec.register(media_type::ARTIFACT_MANIFEST, artifact::unmarshal);
    codec.register_default(unmarshal_inferred);
    codec
});

/// Dispatch `bytes` to the unmarshal function registered for `media_type`.
///
/// An empty or missing media type goes through the default handler, which
/// infers the schema from the payload. The returned descriptor carries the
/// digest over the exact input bytes.
pub fn unmarshal_manifest(
    media_type: Option<&str>,
    bytes: Bytes,
) -> Result<(Manifest, Descriptor), ManifestError> {
    let codec = &*CODEC;
    let manifest = match media_type.filter(|mt| !mt.is_empty()) {
        Some(mt) => match codec.handlers.get(mt) {
            Some(f) => f(bytes)?,
            None => return Err(ManifestError::Unsupported(Some(mt.to_string()))),
        },
        None => match codec.default_handler {
            Some(f) => f(bytes)?,
            None => return Err(ManifestError::Unsupported(None)),
        },
    };
    let descriptor = manifest.descriptor();
    Ok((manifest, descriptor))
}

/// Default handler: dispatch on an embedded `mediaType` field when the
/// payload carries a registered one, otherwise try the image manifest and
/// image index schemas in turn.
fn unmarshal_inferred(bytes: Bytes) -> Result<Manifest, ManifestError> {
    #[derive(serde::Deserialize)]
    struct Probe {
        #[serde(rename = "mediaType", default)]
        media_type: Option<String>,
    }

    if let Ok(Probe {
        media_type: Some(mt),
    }) = serde_json::from_slice::<Probe>(&bytes)
    {
        if let Some(f) = CODEC.handlers.get(mt.as_str()) {
            return f(bytes);
        }
        return Err(ManifestError::Unsupported(Some(mt)));
    }

    let image_err = match image::unmarshal(bytes.clone()) {
        Ok(m) => return Ok(m),
        Err(e) => e,
    };
    match index::unmarshal(bytes) {
        Ok(m) => Ok(m),
        Err(index_err) => {
            tracing::warn!("unable to unmarshal manifest as image: {image_err}");
            tracing::warn!("unable to unmarshal manifest as index: {index_err}");
            Err(ManifestError::Invalid(
                "payload matches no known manifest schema".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn layer_descriptor(byte: u8) -> serde_json::Value {
        let data = vec![byte; 32];
        serde_json::json!({
            "mediaType": media_type::IMAGE_LAYER,
            "digest": String::from(&OciDigest::from(data.as_slice())),
            "size": data.len(),
        })
    }

    fn image_manifest_json() -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::IMAGE_MANIFEST,
            "config": {
                "mediaType": media_type::IMAGE_CONFIG,
                "digest": String::from(&OciDigest::from(b"config".as_ref())),
                "size": 6,
            },
            "layers": [layer_descriptor(1), layer_descriptor(2)],
        })
    }

    #[test]
    fn canonical_bytes_survive_round_trip() {
        // whitespace and key order must be preserved exactly
        let raw = format!(
            "{{ \"schemaVersion\": 2,\n  \"mediaType\": \"{}\",\n  \"layers\": [],\n  \"config\": {} }}",
            media_type::IMAGE_MANIFEST,
            serde_json::to_string(&image_manifest_json()["config"]).unwrap(),
        );
        let bytes = Bytes::from(raw.clone());
        let (manifest, descriptor) =
            unmarshal_manifest(Some(media_type::IMAGE_MANIFEST), bytes.clone()).unwrap();
        assert_eq!(manifest.canonical(), &bytes);
        assert_eq!(descriptor.digest, OciDigest::from(raw.as_bytes()));
        assert_eq!(descriptor.size, raw.len() as u64);
    }

    #[test]
    fn dispatches_on_media_type() {
        let bytes = Bytes::from(serde_json::to_vec(&image_manifest_json()).unwrap());
        let (manifest, descriptor) =
            unmarshal_manifest(Some(media_type::IMAGE_MANIFEST), bytes).unwrap();
        assert!(matches!(manifest, Manifest::Image(_)));
        assert_eq!(descriptor.media_type, media_type::IMAGE_MANIFEST);
        assert_eq!(manifest.dependencies().len(), 3); // config + 2 layers
    }

    #[test]
    fn unregistered_media_type_is_unsupported() {
        let bytes = Bytes::from_static(b"{}");
        let err = unmarshal_manifest(Some("application/vnd.acme.rocket"), bytes).unwrap_err();
        assert!(matches!(err, ManifestError::Unsupported(Some(_))));
    }

    #[test]
    fn missing_media_type_infers_image() {
        let mut v = image_manifest_json();
        v.as_object_mut().unwrap().remove("mediaType");
        let bytes = Bytes::from(serde_json::to_vec(&v).unwrap());
        let (manifest, _) = unmarshal_manifest(None, bytes).unwrap();
        assert!(matches!(manifest, Manifest::Image(_)));
    }

    #[test]
    fn missing_media_type_infers_index() {
        let v = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [],
        });
        let bytes = Bytes::from(serde_json::to_vec(&v).unwrap());
        let (manifest, _) = unmarshal_manifest(None, bytes).unwrap();
        assert!(matches!(manifest, Manifest::Index(_)));
    }
}
