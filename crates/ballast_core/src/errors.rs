use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror;

use crate::oci_digest::OciDigest;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),
    #[error("invalid repository name: {0}")]
    InvalidRepositoryName(String),
    #[error("invalid tag name: {0}")]
    InvalidTagName(String),
    #[error("invalid manifest reference: {0}")]
    InvalidManifestReference(String),
}

impl Error {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            Error::InvalidDigest(_) => DistributionErrorCode::DigestInvalid,
            Error::UnsupportedDigestAlgorithm(_) => DistributionErrorCode::DigestInvalid,
            Error::InvalidRepositoryName(_) => DistributionErrorCode::NameInvalid,
            Error::InvalidTagName(_) => DistributionErrorCode::TagInvalid,
            Error::InvalidManifestReference(_) => DistributionErrorCode::ManifestInvalid,
        }
    }
}

// distribution error codes
// https://github.com/opencontainers/distribution-spec/blob/main/spec.md#error-codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    SizeInvalid,
    TagInvalid,
    RangeInvalid,
    Unauthorized,
    Denied,
    Unsupported,
    TooManyRequests,
    // catch-all so that client-side deserialization survives codes minted by
    // newer registries
    #[serde(other)]
    Unknown,
}

impl DistributionErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DistributionErrorCode::BlobUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::BlobUploadInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::BlobUploadUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::DigestInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::ManifestBlobUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::ManifestInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::ManifestUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::NameInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::NameUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::SizeInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::TagInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::RangeInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
            DistributionErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            DistributionErrorCode::Denied => StatusCode::FORBIDDEN,
            DistributionErrorCode::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            DistributionErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            DistributionErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            DistributionErrorCode::BlobUnknown => "blob unknown to registry",
            DistributionErrorCode::BlobUploadInvalid => "blob upload invalid",
            DistributionErrorCode::BlobUploadUnknown => "blob upload unknown to registry",
            DistributionErrorCode::DigestInvalid => {
                "provided digest did not match uploaded content"
            }
            DistributionErrorCode::ManifestBlobUnknown => {
                "manifest references a manifest or blob unknown to registry"
            }
            DistributionErrorCode::ManifestInvalid => "manifest invalid",
            DistributionErrorCode::ManifestUnknown => "manifest unknown to registry",
            DistributionErrorCode::NameInvalid => "invalid repository name",
            DistributionErrorCode::NameUnknown => "repository name not known to registry",
            DistributionErrorCode::SizeInvalid => "provided length did not match content length",
            DistributionErrorCode::TagInvalid => "manifest tag did not match URI",
            DistributionErrorCode::RangeInvalid => "requested content range is invalid",
            DistributionErrorCode::Unauthorized => "authentication required",
            DistributionErrorCode::Denied => "requested access to the resource is denied",
            DistributionErrorCode::Unsupported => "the operation is unsupported",
            DistributionErrorCode::TooManyRequests => "too many requests",
            DistributionErrorCode::Unknown => "unknown error",
        }
    }
}

/// Single entry in the standard distribution error body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: DistributionErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl From<DistributionErrorCode> for ErrorInfo {
    fn from(code: DistributionErrorCode) -> Self {
        Self {
            code,
            message: Some(code.default_message().to_string()),
            detail: None,
        }
    }
}

/// JSON body of every distribution API failure:
/// `{"errors":[{"code":"CODE","message":"...","detail":...}]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorInfo>,
}

impl ErrorResponse {
    pub fn single(code: DistributionErrorCode, message: Option<String>) -> Self {
        Self {
            errors: vec![ErrorInfo {
                code,
                message: message.or_else(|| Some(code.default_message().to_string())),
                detail: None,
            }],
        }
    }

    /// The response status is that of the first (most significant) error.
    pub fn status_code(&self) -> StatusCode {
        self.errors
            .first()
            .map(|e| e.code.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("blob unknown to registry: {0}")]
    Unknown(OciDigest),
    #[error("blob upload unknown to registry")]
    UploadUnknown,
    #[error("blob upload invalid: {0}")]
    UploadInvalid(String),
    #[error("blob upload already closed")]
    UploadClosed,
    #[error("chunk must start at offset {expected}")]
    RangeInvalid { expected: u64 },
    #[error("provided digest {provided} did not match uploaded content ({actual})")]
    DigestMismatch {
        provided: OciDigest,
        actual: OciDigest,
    },
    #[error("provided length did not match content length")]
    SizeInvalid,
    #[error(transparent)]
    Core(#[from] Error),
}

impl BlobError {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            BlobError::Unknown(_) => DistributionErrorCode::BlobUnknown,
            BlobError::UploadUnknown => DistributionErrorCode::BlobUploadUnknown,
            BlobError::UploadInvalid(_) => DistributionErrorCode::BlobUploadInvalid,
            BlobError::UploadClosed => DistributionErrorCode::BlobUploadInvalid,
            BlobError::RangeInvalid { .. } => DistributionErrorCode::RangeInvalid,
            BlobError::DigestMismatch { .. } => DistributionErrorCode::DigestInvalid,
            BlobError::SizeInvalid => DistributionErrorCode::SizeInvalid,
            BlobError::Core(e) => e.code(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("manifest unknown to registry")]
    Unknown,
    #[error("manifest invalid: {0}")]
    Invalid(String),
    #[error("manifest media type unsupported: {0:?}")]
    Unsupported(Option<String>),
    #[error("manifest verification failed")]
    Verification(ManifestVerification),
    #[error(transparent)]
    Core(#[from] Error),
}

impl ManifestError {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            ManifestError::Unknown => DistributionErrorCode::ManifestUnknown,
            ManifestError::Invalid(_) => DistributionErrorCode::ManifestInvalid,
            ManifestError::Unsupported(_) => DistributionErrorCode::Unsupported,
            ManifestError::Verification(_) => DistributionErrorCode::ManifestInvalid,
            ManifestError::Core(e) => e.code(),
        }
    }
}

/// Aggregated reference-existence failures from a manifest put.
///
/// All references are checked before failing so that a client learns every
/// missing dependency in one round trip.
#[derive(Debug, Default)]
pub struct ManifestVerification {
    pub errors: Vec<VerificationError>,
}

#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("manifest references blob unknown to repository: {0}")]
    BlobUnknown(OciDigest),
    #[error("manifest references manifest unknown to repository: {0}")]
    ManifestUnknown(OciDigest),
}

impl ManifestVerification {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, err: VerificationError) {
        self.errors.push(err);
    }

    /// One `MANIFEST_BLOB_UNKNOWN` entry per missing reference, with the
    /// digest carried in `detail`.
    pub fn error_response(&self) -> ErrorResponse {
        ErrorResponse {
            errors: self
                .errors
                .iter()
                .map(|e| {
                    let digest = match e {
                        VerificationError::BlobUnknown(d) => d,
                        VerificationError::ManifestUnknown(d) => d,
                    };
                    ErrorInfo {
                        code: DistributionErrorCode::ManifestBlobUnknown,
                        message: Some(format!("{e}")),
                        detail: Some(serde_json::json!({ "digest": String::from(digest) })),
                    }
                })
                .collect(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("tag unknown to registry: {0}")]
    Unknown(String),
    #[error(transparent)]
    Core(#[from] Error),
}

impl TagError {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            // untagging an absent tag is an error, not a no-op; on the wire a
            // missing tag is a missing manifest reference
            TagError::Unknown(_) => DistributionErrorCode::ManifestUnknown,
            TagError::Core(e) => e.code(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("repository name not known to registry: {0}")]
    Unknown(String),
    #[error(transparent)]
    Core(#[from] Error),
}

impl RepositoryError {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            RepositoryError::Unknown(_) => DistributionErrorCode::NameUnknown,
            RepositoryError::Core(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_wire_names() {
        let s = serde_json::to_string(&DistributionErrorCode::ManifestBlobUnknown).unwrap();
        assert_eq!(s, "\"MANIFEST_BLOB_UNKNOWN\"");
        let s = serde_json::to_string(&DistributionErrorCode::TooManyRequests).unwrap();
        assert_eq!(s, "\"TOO_MANY_REQUESTS\"");
    }

    #[test]
    fn unknown_codes_deserialize() {
        let body = r#"{"errors":[{"code":"FROB_EXHAUSTED","message":"no frobs left"}]}"#;
        let resp: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.errors[0].code, DistributionErrorCode::Unknown);
        assert_eq!(resp.errors[0].message.as_deref(), Some("no frobs left"));
    }

    #[test]
    fn error_response_round_trip() {
        let resp = ErrorResponse::single(DistributionErrorCode::BlobUnknown, None);
        let s = serde_json::to_string(&resp).unwrap();
        let back: ErrorResponse = serde_json::from_str(&s).unwrap();
        assert_eq!(back.errors[0].code, DistributionErrorCode::BlobUnknown);
        assert_eq!(resp.status_code(), http::StatusCode::NOT_FOUND);
    }
}
