use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::LOCATION, Url};

use crate::util::HttpClient;

/// Which browser header profile a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Top level page navigation.
    Page,
    /// Cross-site XHR against the conversion API.
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(Arc<reqwest_middleware::Error>),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("gave up after {0} redirects")]
    TooManyRedirects(usize),
    #[error("invalid redirect location '{0}'")]
    InvalidLocation(String),
    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<reqwest_middleware::Error> for TransportError {
    fn from(e: reqwest_middleware::Error) -> Self {
        TransportError::Request(Arc::new(e))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Request(Arc::new(reqwest_middleware::Error::Reqwest(e)))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

/// A single GET round trip. Implementations must not follow redirects on
/// their own; callers decide how many hops they allow.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Response, TransportError>;
}

/// Resolves a `Location` header, absolute or relative, against the URL that
/// produced it.
pub fn resolve_location(base: &str, location: &str) -> Result<String, TransportError> {
    Url::parse(base)
        .and_then(|base| base.join(location))
        .map(String::from)
        .map_err(|_| TransportError::InvalidLocation(location.to_string()))
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Response, TransportError> {
        let resp = self
            .client
            .get(url)
            .headers(self.headers(kind).clone())
            .send()
            .await?;

        let status = resp.status().as_u16();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|l| l.to_str().ok())
            .map(String::from);
        let body = resp.text().await?;

        Ok(Response {
            status,
            location,
            body,
        })
    }
}
