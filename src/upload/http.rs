//! HTTP object-store client.
//!
//! Objects are written with `PUT {endpoint}/{destination}`, one request per
//! upload. The store's `Location` header (when present) becomes the locator,
//! otherwise the object URL itself is returned.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use super::{guess_content_type, Destination, UploadSink};
use crate::error::{UploadError, UploadErrorKind};
use crate::frame::content_sha256;

const MAX_ERROR_BODY_CHARS: usize = 200;

pub struct HttpObjectStore {
    endpoint: Url,
    token: Option<String>,
    content_type: Option<String>,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        content_type: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse upload endpoint")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported upload scheme '{}'; expected http(s)",
                endpoint.scheme()
            ));
        }
        if endpoint.cannot_be_a_base() {
            return Err(anyhow!("upload endpoint {} cannot hold object paths", endpoint));
        }
        if endpoint.scheme() == "http" && token.is_some() {
            log::warn!(
                "HttpObjectStore: bearer token will be sent over plain http to {}",
                endpoint
            );
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        log::info!("HttpObjectStore: endpoint {}", endpoint);
        Ok(Self {
            endpoint,
            token,
            content_type,
            agent,
        })
    }

    /// URL of `destination` under the endpoint; each segment is percent-encoded.
    pub fn object_url(&self, destination: &Destination) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                UploadError::new(
                    UploadErrorKind::Rejected,
                    format!("endpoint {} cannot hold object paths", self.endpoint),
                )
            })?;
            segments.pop_if_empty();
            for segment in destination.segments() {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

impl UploadSink for HttpObjectStore {
    fn name(&self) -> &str {
        "HttpObjectStore"
    }

    fn put_object(&self, destination: &Destination, bytes: &[u8]) -> Result<Url, UploadError> {
        let url = self.object_url(destination)?;
        let content_type = self
            .content_type
            .as_deref()
            .unwrap_or_else(|| guess_content_type(destination));

        let mut request = self
            .agent
            .put(url.as_str())
            .set("Content-Type", content_type)
            .set("x-content-sha256", &content_sha256(bytes));
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        match request.send_bytes(bytes) {
            Ok(response) => {
                let locator = response
                    .header("Location")
                    .and_then(|location| url.join(location).ok())
                    .unwrap_or(url);
                Ok(locator)
            }
            Err(err) => Err(map_request_error(err)),
        }
    }
}

pub(crate) fn status_error_kind(code: u16) -> UploadErrorKind {
    match code {
        401 | 403 => UploadErrorKind::Auth,
        413 | 429 | 507 => UploadErrorKind::Quota,
        _ => UploadErrorKind::Rejected,
    }
}

fn map_request_error(err: ureq::Error) -> UploadError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            let reason = if body.is_empty() {
                format!("store returned {}", code)
            } else {
                format!("store returned {}: {}", code, body)
            };
            UploadError::new(status_error_kind(code), reason)
        }
        ureq::Error::Transport(transport) => {
            UploadError::new(UploadErrorKind::Network, transport.to_string())
        }
    }
}
