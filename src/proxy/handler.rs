//! Proxy request handling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE,
    EXPIRES, HOST, IF_MODIFIED_SINCE, PRAGMA, X_CONTENT_TYPE_OPTIONS,
};
use bytes::Bytes;
use chrono::Utc;
use url::Url;

use super::error::ProxyError;
use super::http::{set_caching_headers, HttpRequest, HttpResponse};
use super::ssrf::{SsrfError, SsrfPolicy};
use super::uri::ProxyUri;
use super::{
    params, LockedDomainService, RequestPipeline, ResponseRewriterRegistry,
    DEFAULT_REFRESH_SECS, DISALLOWED_RESPONSE_HEADERS, FORWARDED_REQUEST_HEADERS,
    LONG_LIVED_REFRESH_SECS,
};

/// Inbound proxy request.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub headers: HeaderMap,
    /// Query parameters; the first occurrence of a name wins.
    pub query: HashMap<String, String>,
}

impl ProxyRequest {
    pub fn new(headers: HeaderMap, raw_query: Option<&str>) -> Self {
        let mut query = HashMap::new();
        if let Some(raw) = raw_query {
            for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
                query.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
        }
        Self { headers, query }
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get(HOST).and_then(|v| v.to_str().ok())
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Outbound proxy response.
#[derive(Debug, Clone, Default)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    pub long_lived_refresh_secs: u64,
    pub default_refresh_secs: u64,
    /// Lowercased.
    pub disallowed_response_headers: HashSet<String>,
    pub forwarded_request_headers: Vec<HeaderName>,
    pub ssrf: SsrfPolicy,
    /// Deployed resource version compared against `v`.
    pub version_fingerprint: Option<String>,
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            long_lived_refresh_secs: LONG_LIVED_REFRESH_SECS,
            default_refresh_secs: DEFAULT_REFRESH_SECS,
            disallowed_response_headers: DISALLOWED_RESPONSE_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            forwarded_request_headers: FORWARDED_REQUEST_HEADERS
                .iter()
                .map(|h| HeaderName::from_static(*h))
                .collect(),
            ssrf: SsrfPolicy::default(),
            version_fingerprint: None,
        }
    }
}

/// Serves proxied resources with an enforced content type.
pub struct ProxyHandler {
    pipeline: Arc<dyn RequestPipeline>,
    locked_domain: Arc<dyn LockedDomainService>,
    rewriters: Option<Arc<dyn ResponseRewriterRegistry>>,
    config: ProxyHandlerConfig,
}

impl ProxyHandler {
    pub fn new(
        pipeline: Arc<dyn RequestPipeline>,
        locked_domain: Arc<dyn LockedDomainService>,
        rewriters: Option<Arc<dyn ResponseRewriterRegistry>>,
        config: ProxyHandlerConfig,
    ) -> Self {
        Self {
            pipeline,
            locked_domain,
            rewriters,
            config,
        }
    }

    pub async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        // Any conditional request is answered as unchanged without looking
        // at the resource.
        if request.headers.contains_key(IF_MODIFIED_SINCE) {
            return Ok(ProxyResponse {
                status: 304,
                ..ProxyResponse::default()
            });
        }

        let host = request.host();
        if !self.locked_domain.is_safe_for_open_proxy(host) {
            let url = request.param(params::URL).unwrap_or_default();
            let host = host.unwrap_or_default();
            tracing::info!(
                target: "proxy",
                url = %url,
                host = %host,
                "embed request made to wrong domain"
            );
            return Err(ProxyError::InvalidParameter(format!(
                "embed request for url {url} made to wrong domain {host}"
            )));
        }

        let proxy_uri =
            ProxyUri::process(&request.query, self.config.version_fingerprint.as_deref())?;

        let upstream = self.build_request(request, &proxy_uri, proxy_uri.resource())?;

        let mut headers = HeaderMap::new();
        let ttl = proxy_uri.translate_status_refresh(
            self.config.long_lived_refresh_secs,
            self.config.default_refresh_secs,
        )?;
        set_caching_headers(&mut headers, ttl, Utc::now());

        let mut results = self.pipeline.execute(&upstream).await;

        if results.is_error() {
            if let Some(fallback) = request.param(params::FALLBACK_URL) {
                let target = Url::parse(fallback).map_err(|e| {
                    ProxyError::InvalidParameter(format!(
                        "{} param is invalid: {e}",
                        params::FALLBACK_URL
                    ))
                })?;
                tracing::debug!(
                    target: "proxy",
                    url = %upstream.uri,
                    status = results.status,
                    fallback = %target,
                    "primary fetch failed, trying fallback"
                );
                let retry = self.build_request(request, &proxy_uri, &target)?;
                results = self.pipeline.execute(&retry).await;
            }
        }

        if let Some(rewriters) = &self.rewriters {
            results = rewriters.rewrite_response(&upstream, results)?;
        }

        self.project_headers(&results, &mut headers);
        negotiate_content_type(&upstream, &results, &mut headers)?;

        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment;filename=p.txt"),
        );
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

        let status = match results.status {
            200 => 200,
            // An upstream's internal error is our bad gateway.
            500 => 502,
            other => other,
        };

        Ok(ProxyResponse {
            status,
            headers,
            body: results.body,
        })
    }

    fn build_request(
        &self,
        request: &ProxyRequest,
        proxy_uri: &ProxyUri,
        target: &Url,
    ) -> Result<HttpRequest, ProxyError> {
        validate_target(target, &self.config.ssrf)?;

        let mut upstream = HttpRequest::new(target.clone());
        upstream.container = proxy_uri.container().to_string();
        upstream.gadget = proxy_uri.gadget().map(str::to_string);

        for name in params::INTEGER_RESIZE {
            if let Some(value) = request.param(name) {
                match value.trim().parse::<i64>() {
                    Ok(n) => {
                        upstream.params.insert(name.to_string(), n);
                    }
                    Err(_) => {
                        tracing::debug!(target: "proxy", param = name, value, "dropping non-integer param")
                    }
                }
            }
        }

        upstream.rewrite_mime_type = request.param(params::REWRITE_MIME).map(str::to_string);
        upstream.sanitization_requested = request.param(params::SANITIZE) == Some("1");

        for name in &self.config.forwarded_request_headers {
            for value in request.headers.get_all(name) {
                upstream.headers.append(name.clone(), value.clone());
            }
        }
        Ok(upstream)
    }

    /// Copy upstream headers that are neither configured out nor owned by
    /// the handler's caching policy.
    fn project_headers(&self, results: &HttpResponse, headers: &mut HeaderMap) {
        for (name, value) in &results.headers {
            if is_caching_header(name) {
                continue;
            }
            if !self
                .config
                .disallowed_response_headers
                .contains(name.as_str())
            {
                headers.append(name.clone(), value.clone());
            }
        }
    }
}

/// Set by [`set_caching_headers`]; never taken from upstream.
fn is_caching_header(name: &HeaderName) -> bool {
    *name == CACHE_CONTROL || *name == EXPIRES || *name == PRAGMA
}

/// Scheme and host checks, then the SSRF policy.
fn validate_target(target: &Url, ssrf: &SsrfPolicy) -> Result<(), ProxyError> {
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidParameter(format!(
            "invalid request url scheme in url: {target}"
        )));
    }
    if target.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::InvalidParameter(format!(
            "missing domain name for request: {target}"
        )));
    }
    ssrf.validate_url(target).map_err(|e| match e {
        SsrfError::Blocked(msg) => {
            tracing::warn!(target: "proxy", url = %target, reason = %msg, "blocked proxy target");
            ProxyError::Forbidden(msg)
        }
        other => ProxyError::InvalidParameter(other.to_string()),
    })
}

/// Apply the request's required MIME type to the outbound headers.
///
/// A `type/*` requirement only overrides an upstream type outside that
/// family, and then with the bare family name.
fn negotiate_content_type(
    upstream: &HttpRequest,
    results: &HttpResponse,
    headers: &mut HeaderMap,
) -> Result<(), ProxyError> {
    let Some(required) = upstream.rewrite_mime_type.as_deref().filter(|m| !m.is_empty()) else {
        return Ok(());
    };
    let response_type = results.content_type().unwrap_or_default();

    let content_type = match required.strip_suffix("/*") {
        Some(family) if !response_type.is_empty() => {
            if response_type
                .to_ascii_lowercase()
                .starts_with(&family.to_ascii_lowercase())
            {
                return Ok(());
            }
            family
        }
        _ => required,
    };
    let value = HeaderValue::from_str(content_type).map_err(|_| {
        ProxyError::InvalidParameter(format!("invalid {} parameter", params::REWRITE_MIME))
    })?;
    headers.insert(CONTENT_TYPE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::HostLockedDomainService;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses and records requests.
    struct Scripted {
        responses: Mutex<Vec<HttpResponse>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestPipeline for Scripted {
        async fn execute(&self, request: &HttpRequest) -> HttpResponse {
            self.seen.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                HttpResponse::error()
            } else {
                responses.remove(0)
            }
        }
    }

    fn handler(pipeline: Arc<Scripted>) -> ProxyHandler {
        ProxyHandler::new(
            pipeline,
            Arc::new(HostLockedDomainService::disabled()),
            None,
            ProxyHandlerConfig::default(),
        )
    }

    fn request(query: &str) -> ProxyRequest {
        ProxyRequest::new(HeaderMap::new(), Some(query))
    }

    #[tokio::test]
    async fn test_if_modified_since_short_circuits() {
        let pipeline = Scripted::new(vec![]);
        let mut headers = HeaderMap::new();
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );
        let req = ProxyRequest::new(headers, Some("url=http%3A%2F%2Fexample.com%2Fa.png"));
        let resp = handler(pipeline.clone()).fetch(&req).await.unwrap();
        assert_eq!(resp.status, 304);
        assert!(pipeline.seen().is_empty());
    }

    #[tokio::test]
    async fn test_missing_url_is_400() {
        let err = handler(Scripted::new(vec![]))
            .fetch(&request("container=x"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_bad_scheme_is_400_before_fetch() {
        let pipeline = Scripted::new(vec![]);
        let err = handler(pipeline.clone())
            .fetch(&request("url=ftp%3A%2F%2Fexample.com%2Fa"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParameter(_)));
        assert!(pipeline.seen().is_empty());
    }

    #[tokio::test]
    async fn test_private_target_is_forbidden() {
        let pipeline = Scripted::new(vec![]);
        let err = handler(pipeline.clone())
            .fetch(&request("url=http%3A%2F%2F127.0.0.1%2Fadmin"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(pipeline.seen().is_empty());
    }

    #[tokio::test]
    async fn test_resize_params_parsed_or_dropped() {
        let pipeline = Scripted::new(vec![HttpResponse::new(200)]);
        handler(pipeline.clone())
            .fetch(&request(
                "url=http%3A%2F%2Fexample.com%2Fa.png&resize_w=50&resize_h=abc&resize_q=90",
            ))
            .await
            .unwrap();
        let seen = pipeline.seen();
        assert_eq!(seen[0].param(params::RESIZE_WIDTH), Some(50));
        assert_eq!(seen[0].param(params::RESIZE_HEIGHT), None);
        assert_eq!(seen[0].param(params::RESIZE_QUALITY), Some(90));
        assert_eq!(seen[0].param(params::NO_EXPAND), None);
    }

    #[tokio::test]
    async fn test_only_allowed_request_headers_forwarded() {
        let pipeline = Scripted::new(vec![HttpResponse::new(200)]);
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("ua"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        let req = ProxyRequest::new(headers, Some("url=http%3A%2F%2Fexample.com%2Fa.png"));
        handler(pipeline.clone()).fetch(&req).await.unwrap();
        let seen = pipeline.seen();
        assert_eq!(seen[0].headers.get("user-agent").unwrap(), "ua");
        assert!(seen[0].headers.get("cookie").is_none());
    }

    #[tokio::test]
    async fn test_disallowed_headers_dropped_and_hardening_added() {
        let upstream = HttpResponse::new(200)
            .with_header("Set-Cookie", "a=b")
            .with_header("Content-Length", "3")
            .with_header("X-Custom", "kept")
            .with_header("Content-Type", "image/png")
            .with_body("abc");
        let resp = handler(Scripted::new(vec![upstream]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png"))
            .await
            .unwrap();
        assert!(resp.headers.get("set-cookie").is_none());
        assert!(resp.headers.get("content-length").is_none());
        assert_eq!(resp.headers["x-custom"], "kept");
        assert_eq!(resp.headers[CONTENT_DISPOSITION], "attachment;filename=p.txt");
        assert_eq!(resp.headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(resp.headers["cache-control"], "public,max-age=3600");
        assert_eq!(&resp.body[..], b"abc");
    }

    #[tokio::test]
    async fn test_caching_headers_not_projected_even_if_allowed() {
        let upstream = HttpResponse::new(200)
            .with_header("Cache-Control", "private, max-age=0")
            .with_header("Expires", "0")
            .with_header("Pragma", "no-cache")
            .with_header("X-Custom", "kept");
        let config = ProxyHandlerConfig {
            disallowed_response_headers: HashSet::from(["set-cookie".to_string()]),
            ..ProxyHandlerConfig::default()
        };
        let handler = ProxyHandler::new(
            Scripted::new(vec![upstream]),
            Arc::new(HostLockedDomainService::disabled()),
            None,
            config,
        );
        let resp = handler
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png&refresh=60"))
            .await
            .unwrap();

        assert_eq!(resp.headers.get_all(CACHE_CONTROL).iter().count(), 1);
        assert_eq!(resp.headers[CACHE_CONTROL], "public,max-age=60");
        assert_eq!(resp.headers.get_all(EXPIRES).iter().count(), 1);
        assert_ne!(resp.headers[EXPIRES], "0");
        assert!(resp.headers.get(PRAGMA).is_none());
        assert_eq!(resp.headers["x-custom"], "kept");
    }

    #[tokio::test]
    async fn test_wildcard_mime_kept_when_compatible() {
        let upstream = HttpResponse::new(200).with_header("content-type", "image/png");
        let resp = handler(Scripted::new(vec![upstream]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png&rewriteMime=image%2F*"))
            .await
            .unwrap();
        assert_eq!(resp.headers[CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn test_wildcard_mime_overrides_incompatible() {
        let upstream = HttpResponse::new(200).with_header("content-type", "text/html");
        let resp = handler(Scripted::new(vec![upstream]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png&rewriteMime=image%2F*"))
            .await
            .unwrap();
        assert_eq!(resp.headers[CONTENT_TYPE], "image");
    }

    #[tokio::test]
    async fn test_exact_mime_always_set() {
        let upstream = HttpResponse::new(200).with_header("content-type", "text/html");
        let resp = handler(Scripted::new(vec![upstream]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fs.css&rewriteMime=text%2Fcss"))
            .await
            .unwrap();
        assert_eq!(resp.headers[CONTENT_TYPE], "text/css");

        // Wildcard with no upstream type falls back to the literal value.
        let resp = handler(Scripted::new(vec![HttpResponse::new(200)]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa&rewriteMime=image%2F*"))
            .await
            .unwrap();
        assert_eq!(resp.headers[CONTENT_TYPE], "image/*");
    }

    #[tokio::test]
    async fn test_upstream_500_becomes_502_without_fallback() {
        let pipeline = Scripted::new(vec![HttpResponse::new(500).with_body("oops")]);
        let resp = handler(pipeline.clone())
            .fetch(&request(
                "url=http%3A%2F%2Fevil.example%2Fimg.png&resize_w=50&resize_h=40",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 502);
        assert_eq!(pipeline.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let resp = handler(Scripted::new(vec![HttpResponse::new(404)]))
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fmissing"))
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_fallback_used_once() {
        let pipeline = Scripted::new(vec![
            HttpResponse::new(404).with_body("primary"),
            HttpResponse::new(200)
                .with_header("x-source", "fallback")
                .with_body("fallback"),
        ]);
        let resp = handler(pipeline.clone())
            .fetch(&request(
                "url=http%3A%2F%2Fexample.com%2Fa.png&fallback_url=http%3A%2F%2Fexample.com%2Fb.png",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers["x-source"], "fallback");
        assert_eq!(&resp.body[..], b"fallback");
        let seen = pipeline.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].uri.as_str(), "http://example.com/b.png");
    }

    #[tokio::test]
    async fn test_failed_fallback_not_retried() {
        let pipeline = Scripted::new(vec![HttpResponse::new(500), HttpResponse::new(500)]);
        let resp = handler(pipeline.clone())
            .fetch(&request(
                "url=http%3A%2F%2Fexample.com%2Fa.png&fallback_url=http%3A%2F%2Fexample.com%2Fb.png",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 502);
        assert_eq!(pipeline.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_fallback_is_400() {
        let pipeline = Scripted::new(vec![HttpResponse::new(404)]);
        let err = handler(pipeline)
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png&fallback_url=%3A%3Anope"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_wrong_domain_rejected() {
        let pipeline = Scripted::new(vec![]);
        let handler = ProxyHandler::new(
            pipeline.clone(),
            Arc::new(HostLockedDomainService::new(true, "-a.example.com")),
            None,
            ProxyHandlerConfig::default(),
        );
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("g1-a.example.com"));
        let req = ProxyRequest::new(headers, Some("url=http%3A%2F%2Fexample.com%2Fa.png"));
        let err = handler.fetch(&req).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(pipeline.seen().is_empty());
    }

    #[tokio::test]
    async fn test_bad_refresh_is_400_before_fetch() {
        let pipeline = Scripted::new(vec![]);
        let err = handler(pipeline.clone())
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png&refresh=-5"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(pipeline.seen().is_empty());
    }

    #[tokio::test]
    async fn test_rewriter_error_uses_its_status() {
        struct Failing;
        impl ResponseRewriterRegistry for Failing {
            fn rewrite_response(
                &self,
                _request: &HttpRequest,
                _response: HttpResponse,
            ) -> Result<HttpResponse, crate::proxy::RewritingError> {
                Err(crate::proxy::RewritingError::new("nope", 503))
            }
        }
        let handler = ProxyHandler::new(
            Scripted::new(vec![HttpResponse::new(200)]),
            Arc::new(HostLockedDomainService::disabled()),
            Some(Arc::new(Failing)),
            ProxyHandlerConfig::default(),
        );
        let err = handler
            .fetch(&request("url=http%3A%2F%2Fexample.com%2Fa.png"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProxyError::Internal {
                message: "nope".into(),
                status: 503
            }
        );
    }

    #[tokio::test]
    async fn test_sanitize_flags_copied() {
        let pipeline = Scripted::new(vec![HttpResponse::new(200)]);
        handler(pipeline.clone())
            .fetch(&request(
                "url=http%3A%2F%2Fexample.com%2Fs.css&sanitize=1&rewriteMime=text%2Fcss&container=c1&gadget=http%3A%2F%2Fg.example.com%2Fg.xml",
            ))
            .await
            .unwrap();
        let seen = pipeline.seen();
        assert!(seen[0].sanitization_requested);
        assert_eq!(seen[0].rewrite_mime_type.as_deref(), Some("text/css"));
        assert_eq!(seen[0].container, "c1");
        assert_eq!(seen[0].gadget.as_deref(), Some("http://g.example.com/g.xml"));
    }
}
