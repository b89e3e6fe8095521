//! # Ballast Core
//!
//! `ballast_core` provides the shared vocabulary of the Ballast registry:
//! digests, descriptors, validated names, the polymorphic manifest codec,
//! and the distribution error taxonomy with its HTTP mapping. Both the
//! server-side stores in [`ballast_registry`] and the HTTP client in
//! [`ballast_client`] speak these types.
pub mod errors;
pub use errors::{
    BlobError, DistributionErrorCode, Error, ErrorInfo, ErrorResponse, ManifestError,
    ManifestVerification, RepositoryError, Result, TagError, VerificationError,
};

mod oci_digest;
pub use oci_digest::{DigestState, Digester, OciDigest, RegisteredImageSpecAlgorithm};

mod descriptor;
pub use descriptor::{Descriptor, Platform, OCTET_STREAM};

mod reference;
pub use reference::{ManifestRef, RepositoryName, TagName};

pub mod manifest;
pub use manifest::{media_type, unmarshal_manifest, Manifest};

mod stream;
pub use stream::DigestStream;
