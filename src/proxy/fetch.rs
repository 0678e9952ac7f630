//! reqwest-backed request pipeline
//!
//! Every fetch:
//! - validates the target with [`SsrfPolicy`]
//! - resolves the host itself and checks every returned address
//! - pins the validated address so a second lookup cannot rebind it
//! - disables redirects
//! - streams the body with a size cap
//!
//! Failures are logged and reported as a 500 [`HttpResponse`].

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use thiserror::Error;

use super::http::{HttpRequest, HttpResponse};
use super::ssrf::{SsrfError, SsrfPolicy};
use super::RequestPipeline;

/// Maximum URL length (2KB)
pub const MAX_URL_LENGTH: usize = 2048;

/// Default fetch timeout in milliseconds (30s)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Maximum fetch timeout in milliseconds (5 minutes)
pub const MAX_FETCH_TIMEOUT_MS: u64 = 300_000;

/// Default maximum response size (50MB)
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("SSRF protection: {0}")]
    Ssrf(#[from] SsrfError),

    #[error("URL too long: {size} chars (max {max})")]
    UrlTooLong { size: usize, max: usize },

    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Response too large: {size} bytes (max {max})")]
    ResponseTooLarge { size: u64, max: u64 },

    #[error("Stream read error: {0}")]
    StreamRead(String),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_size: u64,
    pub timeout_ms: u64,
    pub ssrf: SsrfPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            ssrf: SsrfPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Capped at [`MAX_FETCH_TIMEOUT_MS`].
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.min(MAX_FETCH_TIMEOUT_MS);
        self
    }

    pub fn with_ssrf(mut self, ssrf: SsrfPolicy) -> Self {
        self.ssrf = ssrf;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestPipeline {
    config: PipelineConfig,
}

impl ReqwestPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch `request`, surfacing failures.
    pub async fn try_execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let url = &request.uri;
        if url.as_str().len() > MAX_URL_LENGTH {
            return Err(FetchError::UrlTooLong {
                size: url.as_str().len(),
                max: MAX_URL_LENGTH,
            });
        }
        self.config.ssrf.validate_url(url)?;

        let host = url
            .host_str()
            .ok_or_else(|| SsrfError::InvalidUrl("URL has no host".to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let timeout = Duration::from_millis(self.config.timeout_ms.min(MAX_FETCH_TIMEOUT_MS));

        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none());

        // IP literals were already checked by validate_url.
        if url.domain().is_some() {
            let ip = self.resolve_and_validate(&host).await?;
            builder = builder.resolve(&host, SocketAddr::new(ip, port));
            tracing::debug!(
                target: "proxy",
                host = %host,
                resolved_ip = %ip,
                "DNS resolved and validated"
            );
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::HttpRequest(format!("failed to create client: {e}")))?;

        let response = client
            .get(url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::HttpRequest(e.to_string()))?;

        if let Some(len) = response.content_length() {
            if len > self.config.max_size {
                return Err(FetchError::ResponseTooLarge {
                    size: len,
                    max: self.config.max_size,
                });
            }
        }

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_with_limit(response, self.config.max_size).await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Returns the first address, after checking all of them.
    async fn resolve_and_validate(&self, host: &str) -> Result<IpAddr, FetchError> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let lookup = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| FetchError::DnsResolution(format!("{host}: {e}")))?;

        let mut first = None;
        for ip in lookup.iter() {
            self.config.ssrf.validate_resolved_ip(&ip, host)?;
            first.get_or_insert(ip);
        }
        first.ok_or_else(|| FetchError::DnsResolution(format!("no addresses returned for {host}")))
    }
}

async fn read_with_limit(response: reqwest::Response, max_size: u64) -> Result<Bytes, FetchError> {
    use futures_util::StreamExt;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::StreamRead(e.to_string()))?;
        let new_size = body.len() as u64 + chunk.len() as u64;
        if new_size > max_size {
            return Err(FetchError::ResponseTooLarge {
                size: new_size,
                max: max_size,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(body))
}

#[async_trait]
impl RequestPipeline for ReqwestPipeline {
    async fn execute(&self, request: &HttpRequest) -> HttpResponse {
        match self.try_execute(request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    FetchError::Ssrf(_) => {
                        tracing::warn!(target: "proxy", url = %request.uri, error = %e, "fetch blocked")
                    }
                    _ => {
                        tracing::debug!(target: "proxy", url = %request.uri, error = %e, "fetch failed")
                    }
                }
                HttpResponse::error()
            }
        }
    }
}
