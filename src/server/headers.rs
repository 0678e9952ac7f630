//! Response hardening headers
//!
//! Proxied bodies are untrusted, so every response carries headers that
//! lock a browser down if it ever renders one:
//! - Content-Security-Policy: `default-src 'none'; sandbox`
//! - X-Content-Type-Options: nosniff
//! - X-Frame-Options: DENY
//! - Referrer-Policy: no-referrer
//! - Strict-Transport-Security, only when configured
//!
//! Headers a handler already set are left alone.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};

pub const DEFAULT_CSP: &str = "default-src 'none'; sandbox";

/// Header set applied to every response. Values are validated once, when
/// the set is built.
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CSP, None)
    }
}

impl SecurityHeadersConfig {
    /// An empty `csp` omits the header. `hsts` is the full
    /// Strict-Transport-Security value.
    pub fn new(csp: &str, hsts: Option<&str>) -> Self {
        let mut config = Self {
            headers: Vec::new(),
        };
        config.push(header::CONTENT_SECURITY_POLICY, csp);
        config.push(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        config.push(header::X_FRAME_OPTIONS, "DENY");
        config.push(header::REFERRER_POLICY, "no-referrer");
        if let Some(hsts) = hsts {
            config.push(header::STRICT_TRANSPORT_SECURITY, hsts);
        }
        config
    }

    fn push(&mut self, name: HeaderName, value: &str) {
        if value.is_empty() {
            return;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => self.headers.push((name, value)),
            Err(_) => {
                tracing::warn!(target: "http", header = %name, "dropping invalid security header value")
            }
        }
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

/// Use with `axum::middleware::from_fn_with_state`.
pub async fn security_headers_middleware(
    State(config): State<Arc<SecurityHeadersConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in config.headers() {
        headers.entry(name.clone()).or_insert_with(|| value.clone());
    }
    response
}
