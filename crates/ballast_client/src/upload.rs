//! Client side of the resumable upload protocol.
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use url::Url;

use ballast_core::{Descriptor, OciDigest, OCTET_STREAM};

use super::errors::{check_response, Error, Result};
use super::headers::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use super::Registry;

const DEFAULT_MAX_RANGE: usize = 6 * 1024 * 1024; // 6 MB per PATCH

/// Stream-style writer over an open upload session.
///
/// Bytes buffer locally up to `max_range` and go out as `PATCH` chunks; the
/// offset tracks the registry's `Range` acknowledgements and the target
/// location follows each response's `Location` header, resolved relative to
/// the previous one. Writes must be serialized by the caller.
pub struct BlobUploadWriter {
    registry: Registry,
    location: Url,
    uuid: String,
    offset: u64,
    buffer: BytesMut,
    max_range: usize,
}

impl BlobUploadWriter {
    pub(crate) fn new(registry: Registry, location: Url, uuid: String) -> Self {
        Self {
            registry,
            location,
            uuid,
            offset: 0,
            buffer: BytesMut::new(),
            max_range: DEFAULT_MAX_RANGE,
        }
    }

    /// Session id, from `Docker-Upload-UUID`.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Bytes the registry has acknowledged so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Where the next chunk will be sent.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Chunk size threshold; mostly a test and tuning knob.
    pub fn set_max_range(&mut self, max_range: usize) {
        self.max_range = max_range.max(1);
    }

    /// Buffer `data`, flushing a `PATCH` for every `max_range` bytes
    /// accumulated.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= self.max_range {
            let chunk = self.buffer.split_to(self.max_range).freeze();
            self.patch(chunk).await?;
        }
        Ok(())
    }

    /// Force out any buffered bytes as a chunk.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let chunk = self.buffer.split().freeze();
            self.patch(chunk).await?;
        }
        Ok(())
    }

    async fn patch(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        let builder = self
            .registry
            .request(Method::PATCH, self.location.clone())
            .await
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, len)
            .header(
                "content-range",
                format!("{}-{}", self.offset, self.offset + len - 1),
            )
            .body(chunk);
        let response = check_response(self.registry.send(builder).await?).await?;
        self.absorb_response(&response)?;
        Ok(())
    }

    // Every upload response restates the acknowledged range, the session id,
    // and the location for the next request.
    fn absorb_response(&mut self, response: &reqwest::Response) -> Result<()> {
        let range = response
            .headers()
            .get("range")
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::MissingHeader("range"))?;
        let (start, end) = parse_range(range).ok_or(Error::InvalidHeader("range"))?;
        self.offset = end - start + 1;

        if let Some(uuid) = response
            .headers()
            .get(DOCKER_UPLOAD_UUID)
            .and_then(|v| v.to_str().ok())
        {
            self.uuid = uuid.to_string();
        }
        if let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            // may be relative to accommodate proxies
            self.location = self.location.join(location)?;
        }
        Ok(())
    }

    /// `PUT <location>?digest=...`: finalize the upload, sending any
    /// buffered remainder as the trailing body.
    pub async fn commit(mut self, digest: &OciDigest) -> Result<Descriptor> {
        let remainder = self.buffer.split().freeze();
        let len = remainder.len() as u64;

        let mut url = self.location.clone();
        url.query_pairs_mut()
            .append_pair("digest", &String::from(digest));

        let mut builder = self
            .registry
            .request(Method::PUT, url)
            .await
            .header(CONTENT_LENGTH, len);
        if !remainder.is_empty() {
            builder = builder
                .header(CONTENT_TYPE, OCTET_STREAM)
                .header(
                    "content-range",
                    format!("{}-{}", self.offset, self.offset + len - 1),
                )
                .body(remainder);
        }

        let response = check_response(self.registry.send(builder).await?).await?;
        if response.status() != StatusCode::CREATED {
            return Err(Error::UnexpectedStatus(response.status()));
        }

        let total = self.offset + len;
        let confirmed = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(OciDigest::try_from)
            .transpose()?
            .unwrap_or_else(|| digest.clone());
        Ok(Descriptor::new(OCTET_STREAM, confirmed, total))
    }

    /// `GET <location>`: the registry's view of the current offset.
    pub async fn status(&self) -> Result<u64> {
        let builder = self
            .registry
            .request(Method::GET, self.location.clone())
            .await;
        let response = check_response(self.registry.send(builder).await?).await?;
        let range = response
            .headers()
            .get("range")
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::MissingHeader("range"))?;
        let (start, end) = parse_range(range).ok_or(Error::InvalidHeader("range"))?;
        Ok(end - start + 1)
    }

    /// `DELETE <location>`: abort the session.
    pub async fn cancel(self) -> Result<()> {
        let builder = self
            .registry
            .request(Method::DELETE, self.location.clone())
            .await;
        check_response(self.registry.send(builder).await?).await?;
        Ok(())
    }
}

/// Parse a `start-end` range header value.
pub(crate) fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::initial("0-0", Some((0, 0)))]
    #[case::first_chunk("0-255", Some((0, 255)))]
    #[case::whole("0-1023", Some((0, 1023)))]
    #[case::empty("", None)]
    #[case::reversed("10-5", None)]
    #[case::garbage("abc-def", None)]
    fn range_parsing(#[case] input: &str, #[case] expected: Option<(u64, u64)>) {
        assert_eq!(parse_range(input), expected);
    }

    #[test]
    fn relative_location_resolution() {
        let base = Url::parse("https://registry.example.com/v2/app/blobs/uploads/u1").unwrap();
        let resolved = base.join("/v2/app/blobs/uploads/u2?state=x").unwrap();
        assert_eq!(
            resolved.as_str(),
            "https://registry.example.com/v2/app/blobs/uploads/u2?state=x",
        );

        let absolute = base.join("https://mirror.example.com/v2/uploads/u3").unwrap();
        assert_eq!(absolute.host_str(), Some("mirror.example.com"));
    }
}
