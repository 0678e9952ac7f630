//! Upstream request and response model.

use std::collections::BTreeMap;

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use url::Url;

/// Request sent to the [`super::RequestPipeline`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub uri: Url,
    /// Headers forwarded from the inbound request.
    pub headers: HeaderMap,
    /// Integer resize parameters, keyed by query parameter name.
    pub params: BTreeMap<String, i64>,
    /// Content type the response must be served as.
    pub rewrite_mime_type: Option<String>,
    pub sanitization_requested: bool,
    pub container: String,
    pub gadget: Option<String>,
}

impl HttpRequest {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            headers: HeaderMap::new(),
            params: BTreeMap::new(),
            rewrite_mime_type: None,
            sanitization_requested: false,
            container: super::params::DEFAULT_CONTAINER.to_string(),
            gadget: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<i64> {
        self.params.get(name).copied()
    }
}

/// Response returned by the [`super::RequestPipeline`].
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Stand-in for a fetch that never produced a response.
    pub fn error() -> Self {
        Self::new(500)
    }

    /// Append a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// First value of `name`, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }
}

/// Set outbound caching headers for a time-to-live in seconds.
///
/// A TTL of zero disables caching.
pub fn set_caching_headers(headers: &mut HeaderMap, ttl: u64, now: DateTime<Utc>) {
    if ttl == 0 {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            EXPIRES,
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
        return;
    }
    let expires = i64::try_from(ttl)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let cache_control = format!("public,max-age={ttl}");
    let expires = expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    // Both strings are plain ASCII.
    if let Ok(v) = HeaderValue::from_str(&cache_control) {
        headers.insert(CACHE_CONTROL, v);
    }
    if let Ok(v) = HeaderValue::from_str(&expires) {
        headers.insert(EXPIRES, v);
    }
    headers.remove(PRAGMA);
}
