use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, IF_NONE_MATCH, LOCATION, RANGE};
use http::{Method, StatusCode};
use serde::Deserialize;
use url::Url;

use ballast_core::{
    unmarshal_manifest, Descriptor, Manifest, ManifestRef, OciDigest, RepositoryName,
    OCTET_STREAM,
};

use super::errors::{check_response, Error, Result};
use super::headers::{accept_manifests, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use super::upload::BlobUploadWriter;
use super::Registry;

const MAX_REDIRECTS: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct ManifestGetOptions {
    /// Etag from a previous fetch; a hit turns into
    /// [`ManifestResponse::NotModified`].
    pub etag: Option<String>,
}

pub enum ManifestResponse {
    NotModified,
    Manifest {
        manifest: Manifest,
        descriptor: Descriptor,
    },
}

#[derive(Clone, Debug, Default)]
pub struct UploadCreateOptions {
    /// Ask the registry to mount `digest` out of the named source
    /// repository instead of uploading it again.
    pub mount: Option<(OciDigest, RepositoryName)>,
}

/// Outcome of starting an upload: a completed mount, or a writer for a fresh
/// session.
pub enum BlobCreate {
    Mounted {
        from: RepositoryName,
        descriptor: Descriptor,
    },
    Writer(BlobUploadWriter),
}

#[derive(Deserialize)]
struct TagList {
    #[allow(dead_code)]
    name: String,
    tags: Vec<String>,
}

/// Client for the `/v2/<name>/` endpoints of a single repository.
pub struct RepositoryClient {
    registry: Registry,
    name: RepositoryName,
}

impl RepositoryClient {
    pub(crate) fn new(registry: Registry, name: RepositoryName) -> Self {
        Self { registry, name }
    }

    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    fn url(&self, suffix: &str) -> Result<Url> {
        self.registry.url(&format!("/v2/{}/{suffix}", self.name))
    }

    fn header_digest(response: &reqwest::Response) -> Result<Option<OciDigest>> {
        match response.headers().get(DOCKER_CONTENT_DIGEST) {
            None => Ok(None),
            Some(value) => {
                let s = value
                    .to_str()
                    .map_err(|_| Error::InvalidHeader(DOCKER_CONTENT_DIGEST))?;
                Ok(Some(OciDigest::try_from(s)?))
            }
        }
    }

    /// `GET /v2/<name>/manifests/<reference>`.
    pub async fn get_manifest(
        &self,
        reference: &ManifestRef,
        opts: ManifestGetOptions,
    ) -> Result<ManifestResponse> {
        let url = self.url(&format!("manifests/{reference}"))?;
        let mut builder = self
            .registry
            .request(Method::GET, url)
            .await
            .header(ACCEPT, accept_manifests());
        if let Some(etag) = &opts.etag {
            builder = builder.header(IF_NONE_MATCH, etag.as_str());
        }

        let response = self.registry.send(builder).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(ManifestResponse::NotModified);
        }
        let response = check_response(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let header_digest = Self::header_digest(&response)?;
        let bytes = response.bytes().await?;

        let (manifest, descriptor) = unmarshal_manifest(content_type.as_deref(), bytes)?;
        if let Some(header_digest) = header_digest {
            if header_digest != descriptor.digest {
                return Err(Error::InvalidHeader(DOCKER_CONTENT_DIGEST));
            }
        }
        Ok(ManifestResponse::Manifest {
            manifest,
            descriptor,
        })
    }

    /// `PUT /v2/<name>/manifests/<reference>`, body is the canonical bytes.
    pub async fn put_manifest(
        &self,
        reference: &ManifestRef,
        manifest: &Manifest,
    ) -> Result<OciDigest> {
        let url = self.url(&format!("manifests/{reference}"))?;
        let builder = self
            .registry
            .request(Method::PUT, url)
            .await
            .header(CONTENT_TYPE, manifest.media_type())
            .body(manifest.canonical().clone());
        let response = check_response(self.registry.send(builder).await?).await?;
        Self::header_digest(&response)?.ok_or(Error::MissingHeader(DOCKER_CONTENT_DIGEST))
    }

    /// `HEAD /v2/<name>/manifests/<reference>`.
    pub async fn manifest_exists(&self, reference: &ManifestRef) -> Result<bool> {
        let url = self.url(&format!("manifests/{reference}"))?;
        let builder = self.registry.request(Method::HEAD, url).await;
        let response = self.registry.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(response).await?;
        Ok(true)
    }

    /// `DELETE /v2/<name>/manifests/<digest>`.
    pub async fn delete_manifest(&self, digest: &OciDigest) -> Result<()> {
        let url = self.url(&format!("manifests/{digest}"))?;
        let builder = self.registry.request(Method::DELETE, url).await;
        check_response(self.registry.send(builder).await?).await?;
        Ok(())
    }

    /// `GET /v2/<name>/tags/list`.
    pub async fn tags(&self, n: Option<usize>, last: Option<&str>) -> Result<Vec<String>> {
        let mut url = self.url("tags/list")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(n) = n {
                query.append_pair("n", &n.to_string());
            }
            if let Some(last) = last {
                query.append_pair("last", last);
            }
        }
        let builder = self.registry.request(Method::GET, url).await;
        let response = check_response(self.registry.send(builder).await?).await?;
        let body: TagList = response.json().await?;
        Ok(body.tags)
    }

    /// `HEAD /v2/<name>/blobs/<digest>`; `None` when the blob is unknown.
    pub async fn stat_blob(&self, digest: &OciDigest) -> Result<Option<Descriptor>> {
        let url = self.url(&format!("blobs/{digest}"))?;
        let builder = self.registry.request(Method::HEAD, url).await;
        let response = self.registry.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_response(response).await?;
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(Error::MissingHeader("content-length"))?;
        let digest = Self::header_digest(&response)?.unwrap_or_else(|| digest.clone());
        Ok(Some(Descriptor::new(OCTET_STREAM, digest, size)))
    }

    /// `GET /v2/<name>/blobs/<digest>`, following presigned redirects by
    /// hand so `Accept` and `Range` survive each hop.
    pub async fn get_blob(
        &self,
        digest: &OciDigest,
        range: Option<(u64, u64)>,
    ) -> Result<Bytes> {
        let mut url = self.url(&format!("blobs/{digest}"))?;
        for hop in 0..MAX_REDIRECTS {
            let mut builder = if hop == 0 {
                self.registry.request(Method::GET, url.clone()).await
            } else {
                // redirect targets are presigned; never leak tokens to them
                self.registry.plain_request(Method::GET, url.clone())
            };
            builder = builder.header(ACCEPT, OCTET_STREAM);
            if let Some((start, end)) = range {
                builder = builder.header(RANGE, format!("bytes={start}-{end}"));
            }

            let response = self.registry.send(builder).await?;
            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(Error::MissingHeader("location"))?;
                url = url.join(location)?;
                continue;
            }
            let response = check_response(response).await?;
            return Ok(response.bytes().await?);
        }
        Err(Error::TooManyRedirects(String::from(digest)))
    }

    /// `DELETE /v2/<name>/blobs/<digest>`: unlink the blob from this
    /// repository.
    pub async fn delete_blob(&self, digest: &OciDigest) -> Result<()> {
        let url = self.url(&format!("blobs/{digest}"))?;
        let builder = self.registry.request(Method::DELETE, url).await;
        check_response(self.registry.send(builder).await?).await?;
        Ok(())
    }

    /// `POST /v2/<name>/blobs/uploads/`, with mount query parameters when
    /// requested. A `201 Created` means the mount succeeded and no session
    /// was opened.
    pub async fn create_upload(&self, opts: UploadCreateOptions) -> Result<BlobCreate> {
        let mut url = self.url("blobs/uploads/")?;
        let mount = opts.mount.clone();
        if let Some((digest, from)) = &mount {
            url.query_pairs_mut()
                .append_pair("mount", &String::from(digest))
                .append_pair("from", from.as_str());
        }

        let builder = self
            .registry
            .request(Method::POST, url.clone())
            .await
            .header(CONTENT_LENGTH, 0);
        let response = check_response(self.registry.send(builder).await?).await?;

        match response.status() {
            StatusCode::CREATED => {
                let (digest, from) =
                    mount.ok_or(Error::UnexpectedStatus(StatusCode::CREATED))?;
                let digest = Self::header_digest(&response)?.unwrap_or(digest);
                Ok(BlobCreate::Mounted {
                    from,
                    descriptor: Descriptor::new(OCTET_STREAM, digest, 0),
                })
            }
            StatusCode::ACCEPTED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(Error::MissingHeader("location"))?;
                let location = url.join(location)?;
                let uuid = response
                    .headers()
                    .get(DOCKER_UPLOAD_UUID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Ok(BlobCreate::Writer(BlobUploadWriter::new(
                    self.registry.clone(),
                    location,
                    uuid,
                )))
            }
            status => Err(Error::UnexpectedStatus(status)),
        }
    }

    /// Convenience: upload `data` in one session and commit it under its
    /// computed digest.
    pub async fn push_blob(&self, data: Bytes) -> Result<Descriptor> {
        let digest = OciDigest::from(data.as_ref());
        let mut writer = match self.create_upload(UploadCreateOptions::default()).await? {
            BlobCreate::Writer(writer) => writer,
            BlobCreate::Mounted { .. } => {
                return Err(Error::UnexpectedStatus(StatusCode::CREATED))
            }
        };
        writer.write(&data).await?;
        writer.commit(&digest).await
    }
}
