//! Token-based authentication discovery.
//!
//! Registries answer unauthenticated requests with
//! `WWW-Authenticate: Bearer realm="...",service="...",scope="..."`; the
//! client follows the realm, obtains a bearer token, and retries.
use http::header::WWW_AUTHENTICATE;
use http::HeaderMap;
use serde::Deserialize;

use super::errors::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
}

impl BearerChallenge {
    /// Parse a `WWW-Authenticate` header value. `None` when the scheme is
    /// not `Bearer` or no realm is present.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("Bearer ")?;
        let mut challenge = BearerChallenge::default();
        for param in rest.split(',') {
            let (key, raw) = param.split_once('=')?;
            let value = raw.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => challenge.realm = value,
                "service" => challenge.service = Some(value),
                "scope" => challenge.scope = Some(value),
                "error" => challenge.error = Some(value),
                _ => {}
            }
        }
        if challenge.realm.is_empty() {
            return None;
        }
        Some(challenge)
    }
}

pub(crate) fn challenge_from_headers(headers: &HeaderMap) -> Option<BearerChallenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(BearerChallenge::parse)
}

// some token servers use `token`, others `access_token`
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Fetches bearer tokens from the auth server a challenge names.
#[derive(Clone)]
pub(crate) struct TokenSource {
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl TokenSource {
    pub(crate) fn new(http: reqwest::Client, credentials: Option<(String, String)>) -> Self {
        Self { http, credentials }
    }

    pub(crate) async fn fetch(&self, challenge: &BearerChallenge) -> Result<String> {
        let mut request = self.http.get(&challenge.realm);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service.as_str())]);
        }
        if let Some(scope) = &challenge.scope {
            request = request.query(&[("scope", scope.as_str())]);
        }
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::AuthChallenge(format!(
                "token endpoint {} answered {}",
                challenge.realm,
                response.status(),
            )));
        }
        let token: TokenResponse = response.json().await?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| Error::AuthChallenge("token endpoint returned no token".to_string()))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::full(
        "Bearer realm=\"https://auth.example.com/token\",service=\"registry.example.com\",scope=\"repository:library/app:pull\"",
        Some(BearerChallenge {
            realm: "https://auth.example.com/token".to_string(),
            service: Some("registry.example.com".to_string()),
            scope: Some("repository:library/app:pull".to_string()),
            error: None,
        })
    )]
    #[case::with_error(
        "Bearer realm=\"r\",error=\"invalid_token\"",
        Some(BearerChallenge {
            realm: "r".to_string(),
            service: None,
            scope: None,
            error: Some("invalid_token".to_string()),
        })
    )]
    #[case::basic_scheme("Basic realm=\"registry\"", None)]
    #[case::no_realm("Bearer service=\"s\"", None)]
    fn parse_challenges(#[case] input: &str, #[case] expected: Option<BearerChallenge>) {
        assert_eq!(BearerChallenge::parse(input), expected);
    }
}
