// Page fetching: one GET per call, bounded by a timeout and a body size cap.
// No retries here; repeated runs are the retry mechanism.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Url,
};
use tracing::debug;

use crate::{
    config::FetchConfig,
    error::{describe_chain, MonitorError},
};

// Raw page as it came off the wire
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchedPage {
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &Url,
        headers: &BTreeMap<String, String>,
    ) -> Result<FetchedPage, MonitorError>;
}

pub struct HttpPageFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpPageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, MonitorError> {
        if config.timeout_ms == 0 {
            return Err(MonitorError::Configuration(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                MonitorError::Configuration(format!("cannot build HTTP client: {}", describe_chain(&e)))
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn transport_error(&self, url: &Url, err: reqwest::Error) -> MonitorError {
        if err.is_timeout() {
            MonitorError::Fetch(format!(
                "request to {url} timed out after {}ms: {}",
                self.config.timeout_ms,
                describe_chain(&err)
            ))
        } else {
            MonitorError::Fetch(format!("request to {url} failed: {}", describe_chain(&err)))
        }
    }

    fn too_large(&self, url: &Url) -> MonitorError {
        MonitorError::Fetch(format!(
            "response from {url} exceeds the {} byte limit",
            self.config.max_body_bytes
        ))
    }
}

pub fn build_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, MonitorError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| MonitorError::Fetch(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| MonitorError::Fetch(format!("invalid value for header {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        url: &Url,
        headers: &BTreeMap<String, String>,
    ) -> Result<FetchedPage, MonitorError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitorError::Fetch(format!(
                "unsupported URL scheme {:?}",
                url.scheme()
            )));
        }

        let header_map = build_header_map(headers)?;
        debug!(%url, timeout_ms = self.config.timeout_ms, "fetching page");

        let mut response = self
            .client
            .get(url.clone())
            .headers(header_map)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Fetch(format!("HTTP {status} from {url}")));
        }

        let limit = self.config.max_body_bytes;
        if let Some(len) = response.content_length() {
            if len > limit as u64 {
                return Err(self.too_large(url));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        // Chunked responses carry no length, so the cap is enforced while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(url, e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(%url, status = status.as_u16(), bytes = body.len(), "page received");

        Ok(FetchedPage {
            status: status.as_u16(),
            content_type,
            body: body.freeze(),
        })
    }
}
