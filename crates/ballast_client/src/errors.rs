use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use thiserror;

use ballast_core::{DistributionErrorCode, ErrorInfo, ErrorResponse};

use crate::auth::challenge_from_headers;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] ballast_core::Error),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Manifest(#[from] ballast_core::ManifestError),

    #[error("registry reported errors ({status})")]
    Distribution {
        status: StatusCode,
        errors: Vec<ErrorInfo>,
    },

    #[error("unexpected response ({status}): {} byte body", body.len())]
    UnexpectedResponse { status: StatusCode, body: Bytes },

    #[error("unexpected status: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),

    #[error("auth challenge error: {0}")]
    AuthChallenge(String),

    #[error("response missing header: {0}")]
    MissingHeader(&'static str),

    #[error("response carried an invalid {0} header")]
    InvalidHeader(&'static str),
}

impl Error {
    /// First distribution error code carried by this error, if any.
    pub fn code(&self) -> Option<DistributionErrorCode> {
        match self {
            Error::Distribution { errors, .. } => errors.first().map(|e| e.code),
            _ => None,
        }
    }
}

/// Pass 2xx responses through; turn everything else into a typed error.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.bytes().await.unwrap_or_default();
    Err(parse_failure(status, &headers, body))
}

/// The response-parsing ladder:
///
/// 1. a standard `{"errors": [...]}` body becomes a typed error list,
///    merged with any `WWW-Authenticate` challenge error on 401;
/// 2. a `{"details": "..."}` body is synthesized into an error whose code
///    matches the status;
/// 3. any other body is surfaced raw for 4xx, or reduced to the bare status
///    otherwise.
pub(crate) fn parse_failure(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Error {
    let challenge_errors = challenge_errors(status, headers);

    if let Ok(parsed) = serde_json::from_slice::<ErrorResponse>(&body) {
        if !parsed.errors.is_empty() {
            let mut errors = challenge_errors;
            errors.extend(parsed.errors);
            return Error::Distribution { status, errors };
        }
    }

    #[derive(Deserialize)]
    struct Details {
        details: String,
    }
    if let Ok(parsed) = serde_json::from_slice::<Details>(&body) {
        let mut errors = challenge_errors;
        errors.push(ErrorInfo {
            code: code_for_status(status),
            message: Some(parsed.details),
            detail: None,
        });
        return Error::Distribution { status, errors };
    }

    if !challenge_errors.is_empty() {
        return Error::Distribution {
            status,
            errors: challenge_errors,
        };
    }

    if status.is_client_error() {
        Error::UnexpectedResponse { status, body }
    } else {
        Error::UnexpectedStatus(status)
    }
}

// RFC 6750: a bearer challenge may carry an `error` attribute naming why the
// presented token was rejected.
fn challenge_errors(status: StatusCode, headers: &HeaderMap) -> Vec<ErrorInfo> {
    if status != StatusCode::UNAUTHORIZED {
        return Vec::new();
    }
    let Some(challenge) = challenge_from_headers(headers) else {
        return Vec::new();
    };
    match challenge.error.as_deref() {
        Some("invalid_token") => vec![ErrorInfo::from(DistributionErrorCode::Unauthorized)],
        Some("insufficient_scope") => vec![ErrorInfo::from(DistributionErrorCode::Denied)],
        _ => Vec::new(),
    }
}

fn code_for_status(status: StatusCode) -> DistributionErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => DistributionErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => DistributionErrorCode::Denied,
        StatusCode::NOT_FOUND => DistributionErrorCode::NameUnknown,
        StatusCode::METHOD_NOT_ALLOWED => DistributionErrorCode::Unsupported,
        StatusCode::RANGE_NOT_SATISFIABLE => DistributionErrorCode::RangeInvalid,
        StatusCode::TOO_MANY_REQUESTS => DistributionErrorCode::TooManyRequests,
        _ => DistributionErrorCode::Unknown,
    }
}

#[cfg(test)]
mod test {
    use http::header::WWW_AUTHENTICATE;

    use super::*;

    #[test]
    fn standard_error_body() {
        let body = Bytes::from_static(
            br#"{"errors":[{"code":"BLOB_UNKNOWN","message":"blob unknown to registry"}]}"#,
        );
        let err = parse_failure(StatusCode::NOT_FOUND, &HeaderMap::new(), body);
        assert_eq!(err.code(), Some(DistributionErrorCode::BlobUnknown));
    }

    #[test]
    fn details_body_synthesizes_code_from_status() {
        let body = Bytes::from_static(br#"{"details":"quota exceeded"}"#);
        let err = parse_failure(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), body);
        let Error::Distribution { errors, .. } = err else {
            panic!("expected distribution error");
        };
        assert_eq!(errors[0].code, DistributionErrorCode::TooManyRequests);
        assert_eq!(errors[0].message.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn non_json_4xx_keeps_raw_body() {
        let body = Bytes::from_static(b"<html>gateway error</html>");
        let err = parse_failure(StatusCode::BAD_REQUEST, &HeaderMap::new(), body.clone());
        let Error::UnexpectedResponse { status, body: raw } = err else {
            panic!("expected raw response error");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(raw, body);
    }

    #[test]
    fn other_statuses_reduce_to_status() {
        let err = parse_failure(
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            Bytes::from_static(b"oops"),
        );
        assert!(matches!(err, Error::UnexpectedStatus(StatusCode::BAD_GATEWAY)));
    }

    #[test]
    fn invalid_token_challenge_merges_with_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            "Bearer realm=\"https://auth.example.com/token\",error=\"invalid_token\""
                .parse()
                .unwrap(),
        );
        let body = Bytes::from_static(br#"{"errors":[{"code":"DENIED","message":"denied"}]}"#);
        let err = parse_failure(StatusCode::UNAUTHORIZED, &headers, body);
        let Error::Distribution { errors, .. } = err else {
            panic!("expected distribution error");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, DistributionErrorCode::Unauthorized);
        assert_eq!(errors[1].code, DistributionErrorCode::Denied);
    }

    #[test]
    fn insufficient_scope_challenge_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            "Bearer realm=\"r\",error=\"insufficient_scope\"".parse().unwrap(),
        );
        let err = parse_failure(StatusCode::UNAUTHORIZED, &headers, Bytes::new());
        assert_eq!(err.code(), Some(DistributionErrorCode::Denied));
    }
}
