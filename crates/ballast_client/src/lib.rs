//! # Ballast Client
//!
//! HTTP client library for OCI Distribution registries: the mirror image of
//! the server-side stores in [`ballast_registry`]. Provides manifest fetch
//! and push with etag support, chunked resumable blob upload, cross-repo
//! mounting, catalog and tag listing, bearer-token auth discovery, and the
//! standard error-body parsing ladder.
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio::sync::RwLock;
use url::Url;

use ballast_core::RepositoryName;

pub mod errors;
pub use errors::{Error, Result};

mod auth;
pub use auth::BearerChallenge;
use auth::{challenge_from_headers, TokenSource};

mod repository;
pub use repository::{
    BlobCreate, ManifestGetOptions, ManifestResponse, RepositoryClient, UploadCreateOptions,
};

mod upload;
pub use upload::BlobUploadWriter;

pub mod headers {
    use ballast_core::media_type;

    pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
    pub const DOCKER_UPLOAD_UUID: &str = "docker-upload-uuid";
    pub const DISTRIBUTION_API_VERSION: &str = "docker-distribution-api-version";

    /// `Accept` value advertising every manifest schema we can unmarshal.
    pub fn accept_manifests() -> String {
        [
            media_type::IMAGE_MANIFEST,
            media_type::IMAGE_INDEX,
            media_type::ARTIFACT_MANIFEST,
            media_type::DOCKER_MANIFEST,
            media_type::DOCKER_MANIFEST_LIST,
        ]
        .join(", ")
    }
}

const CATALOG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(serde::Deserialize)]
struct CatalogBody {
    repositories: Vec<String>,
}

/// One page of the repository catalog, with the url of the next page when
/// the registry sent a pagination Link.
#[derive(Debug)]
pub struct CatalogPage {
    pub repositories: Vec<String>,
    pub next: Option<String>,
}

struct Inner {
    http: reqwest::Client,
    base: Url,
    tokens: TokenSource,
    token: RwLock<Option<String>>,
}

/// Client for one registry instance.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_credentials(base_url, None)
    }

    /// Credentials are only presented to the token endpoint named by a
    /// bearer challenge, never to the registry itself.
    pub fn with_credentials(
        base_url: &str,
        credentials: Option<(String, String)>,
    ) -> Result<Self> {
        // redirects are followed by hand so that Accept and Range survive
        // presigned-URL hops
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let base = Url::parse(base_url)?;
        Ok(Self {
            inner: Arc::new(Inner {
                tokens: TokenSource::new(http.clone(), credentials),
                http,
                base,
                token: RwLock::new(None),
            }),
        })
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base.join(path)?)
    }

    /// Request builder carrying the cached bearer token, if any.
    pub(crate) async fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.inner.http.request(method, url);
        match self.inner.token.read().await.as_ref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Request builder with no credentials attached, for redirect hops to
    /// storage backends.
    pub(crate) fn plain_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.inner.http.request(method, url)
    }

    /// Send a request, following one auth-discovery round trip: a 401
    /// carrying a fresh bearer challenge triggers a token fetch and a single
    /// retry.
    pub(crate) async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let retry = builder.try_clone();
        let response = builder.send().await?;
        if response.status() != http::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match challenge_from_headers(response.headers()) {
            // a challenge with an error attribute describes a rejected
            // token, not an invitation to fetch one
            Some(challenge) if challenge.error.is_none() => challenge,
            _ => return Ok(response),
        };
        let Some(retry) = retry else {
            return Ok(response);
        };

        tracing::debug!("fetching bearer token from {}", challenge.realm);
        let token = self.inner.tokens.fetch(&challenge).await?;
        *self.inner.token.write().await = Some(token.clone());
        Ok(retry.bearer_auth(token).send().await?)
    }

    /// `GET /v2/`: verify the endpoint implements the distribution API.
    pub async fn check_version(&self) -> Result<()> {
        let url = self.url("/v2/")?;
        let builder = self.request(Method::GET, url).await;
        let response = errors::check_response(self.send(builder).await?).await?;
        if !response.headers().contains_key(headers::DISTRIBUTION_API_VERSION) {
            tracing::warn!("registry did not advertise a distribution api version");
        }
        Ok(())
    }

    /// `GET /v2/_catalog`: list repositories, paginated.
    pub async fn catalog(&self, n: Option<usize>, last: Option<&str>) -> Result<CatalogPage> {
        let mut url = self.url("/v2/_catalog")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(n) = n {
                query.append_pair("n", &n.to_string());
            }
            if let Some(last) = last {
                query.append_pair("last", last);
            }
        }
        let builder = self
            .request(Method::GET, url)
            .await
            .timeout(CATALOG_TIMEOUT);
        let response = errors::check_response(self.send(builder).await?).await?;

        let next = response
            .headers()
            .get(http::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_link_next);
        let body: CatalogBody = response.json().await?;
        Ok(CatalogPage {
            repositories: body.repositories,
            next,
        })
    }

    pub fn repository(&self, name: &str) -> Result<RepositoryClient> {
        let name: RepositoryName = name.parse()?;
        Ok(RepositoryClient::new(self.clone(), name))
    }
}

// `Link: </v2/_catalog?last=x&n=y>; rel="next"`
fn parse_link_next(value: &str) -> Option<String> {
    for part in value.split(',') {
        let part = part.trim();
        let (target, params) = part.split_once(';')?;
        if params.contains("rel=\"next\"") {
            return Some(
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            );
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_header_next() {
        assert_eq!(
            parse_link_next("</v2/_catalog?last=library%2Fapp&n=2>; rel=\"next\""),
            Some("/v2/_catalog?last=library%2Fapp&n=2".to_string()),
        );
        assert_eq!(parse_link_next("</elsewhere>; rel=\"prev\""), None);
    }

    #[test]
    fn accept_header_covers_all_schemas() {
        let accept = headers::accept_manifests();
        assert!(accept.contains("application/vnd.oci.image.manifest.v1+json"));
        assert!(accept.contains("application/vnd.docker.distribution.manifest.list.v2+json"));
    }
}
