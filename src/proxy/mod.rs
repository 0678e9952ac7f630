//! MIME-enforcing resource proxy
//!
//! [`handler::ProxyHandler`] serves `/gadgets/proxy`. It fetches the
//! resource named by the `url` parameter through a [`RequestPipeline`],
//! optionally retries a `fallback_url`, lets a [`ResponseRewriterRegistry`]
//! rewrite the body, strips hop-by-hop and cache headers and pins the
//! declared content type before handing the response back.
//!
//! The collaborators are traits so the server can wire the reqwest pipeline
//! ([`fetch::ReqwestPipeline`]) while tests use in-memory doubles.

pub mod error;
pub mod fetch;
pub mod handler;
pub mod http;
pub mod locked_domain;
pub mod rewriters;
pub mod ssrf;
pub mod uri;

use async_trait::async_trait;

pub use error::{ProxyError, RewritingError};
pub use fetch::{PipelineConfig, ReqwestPipeline};
pub use handler::{ProxyHandler, ProxyHandlerConfig, ProxyRequest, ProxyResponse};
pub use http::{HttpRequest, HttpResponse};
pub use locked_domain::HostLockedDomainService;
pub use rewriters::SanitizingResponseRewriter;
pub use ssrf::{SsrfError, SsrfPolicy};
pub use uri::{ProxyUri, UriStatus};

/// Query parameter names understood by the proxy endpoint.
pub mod params {
    pub const URL: &str = "url";
    pub const CONTAINER: &str = "container";
    pub const GADGET: &str = "gadget";
    pub const REFRESH: &str = "refresh";
    pub const VERSION: &str = "v";
    pub const FINGERPRINT: &str = "fp";
    pub const REWRITE_MIME: &str = "rewriteMime";
    pub const SANITIZE: &str = "sanitize";
    pub const RESIZE_HEIGHT: &str = "resize_h";
    pub const RESIZE_WIDTH: &str = "resize_w";
    pub const RESIZE_QUALITY: &str = "resize_q";
    pub const NO_EXPAND: &str = "no_expand";
    pub const FALLBACK_URL: &str = "fallback_url";

    /// Copied onto the upstream request only when they parse as integers.
    pub const INTEGER_RESIZE: &[&str] = &[RESIZE_HEIGHT, RESIZE_WIDTH, RESIZE_QUALITY, NO_EXPAND];

    pub const DEFAULT_CONTAINER: &str = "default";
}

/// One year.
pub const LONG_LIVED_REFRESH_SECS: u64 = 365 * 24 * 60 * 60;

/// One hour.
pub const DEFAULT_REFRESH_SECS: u64 = 60 * 60;

/// Upstream response headers never copied to the client.
pub const DISALLOWED_RESPONSE_HEADERS: &[&str] = &[
    "set-cookie",
    "content-length",
    "content-encoding",
    "etag",
    "last-modified",
    "accept-ranges",
    "vary",
    "expires",
    "date",
    "pragma",
    "cache-control",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "trailer",
    "upgrade",
    "www-authenticate",
];

/// Inbound request headers forwarded upstream.
pub const FORWARDED_REQUEST_HEADERS: &[&str] = &["accept", "accept-language", "user-agent"];

/// Executes upstream fetches.
///
/// Transport failures are reported as an error [`HttpResponse`], never as
/// an `Err`, so the handler's fallback logic sees them like any other
/// failed fetch.
#[async_trait]
pub trait RequestPipeline: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> HttpResponse;
}

/// Decides whether the open proxy may answer on a given host.
pub trait LockedDomainService: Send + Sync {
    fn is_safe_for_open_proxy(&self, host: Option<&str>) -> bool;
}

/// Rewrites fetched responses before they reach the client.
pub trait ResponseRewriterRegistry: Send + Sync {
    fn rewrite_response(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, RewritingError>;
}
