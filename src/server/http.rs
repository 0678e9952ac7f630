//! HTTP routes
//!
//! - `GET /gadgets/proxy` - MIME-enforcing resource proxy
//! - `GET /health` - liveness probe

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use super::headers::{security_headers_middleware, SecurityHeadersConfig};
use crate::proxy::{ProxyError, ProxyHandler, ProxyRequest, ProxyResponse};

pub const PROXY_PATH: &str = "/gadgets/proxy";
pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyHandler>,
    /// Unix seconds.
    pub start_time: i64,
}

impl AppState {
    pub fn new(proxy: Arc<ProxyHandler>) -> Self {
        Self {
            proxy,
            start_time: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MiddlewareConfig {
    /// `None` disables the security headers middleware.
    pub security_headers: Option<SecurityHeadersConfig>,
}

impl MiddlewareConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn secure() -> Self {
        Self {
            security_headers: Some(SecurityHeadersConfig::default()),
        }
    }
}

pub fn create_router(state: AppState, middleware_config: MiddlewareConfig) -> Router {
    let router: Router = Router::new()
        .route(PROXY_PATH, get(proxy_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state);

    match middleware_config.security_headers {
        Some(config) => router.layer(middleware::from_fn_with_state(
            Arc::new(config),
            security_headers_middleware,
        )),
        None => router,
    }
}

async fn proxy_handler(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let request = ProxyRequest::new(headers, uri.query());
    match state.proxy.fetch(&request).await {
        Ok(response) => into_http(response),
        Err(e) => e.into_response(),
    }
}

fn into_http(response: ProxyResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    *out.headers_mut() = response.headers;
    out
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(target: "http", status = status.as_u16(), error = %self, "proxy request failed");
        } else {
            tracing::debug!(target: "http", status = status.as_u16(), error = %self, "proxy request rejected");
        }
        (status, Json(json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{
        HostLockedDomainService, HttpRequest, HttpResponse, ProxyHandlerConfig, RequestPipeline,
        SsrfPolicy,
    };
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    struct Fixed(HttpResponse);

    #[async_trait]
    impl RequestPipeline for Fixed {
        async fn execute(&self, _request: &HttpRequest) -> HttpResponse {
            self.0.clone()
        }
    }

    fn router(upstream: HttpResponse, middleware: MiddlewareConfig) -> Router {
        let config = ProxyHandlerConfig {
            ssrf: SsrfPolicy::permissive(),
            ..ProxyHandlerConfig::default()
        };
        let handler = ProxyHandler::new(
            Arc::new(Fixed(upstream)),
            Arc::new(HostLockedDomainService::new(true, "-a.example.com")),
            None,
            config,
        );
        create_router(AppState::new(Arc::new(handler)), middleware)
    }

    fn get(uri: &str, host: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(HttpResponse::new(200), MiddlewareConfig::none());
        let response = app.oneshot(get("/health", "proxy.example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_proxy_success() {
        let upstream = HttpResponse::new(200)
            .with_header("content-type", "image/png")
            .with_body("png-bytes");
        let app = router(upstream, MiddlewareConfig::none());
        let response = app
            .oneshot(get(
                "/gadgets/proxy?url=http%3A%2F%2Fcdn.example.com%2Fa.png&rewriteMime=image/*",
                "proxy.example.com",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(
            headers.get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment;filename=p.txt"
        );
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn test_upstream_500_is_502() {
        let app = router(HttpResponse::error(), MiddlewareConfig::none());
        let response = app
            .oneshot(get(
                "/gadgets/proxy?url=http%3A%2F%2Fcdn.example.com%2Fa.png",
                "proxy.example.com",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_missing_url_is_400_json() {
        let app = router(HttpResponse::new(200), MiddlewareConfig::none());
        let response = app
            .oneshot(get("/gadgets/proxy?container=c", "proxy.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn test_wrong_domain_is_400() {
        let app = router(HttpResponse::new(200), MiddlewareConfig::none());
        let response = app
            .oneshot(get(
                "/gadgets/proxy?url=http%3A%2F%2Fcdn.example.com%2Fa.png",
                "g1-a.example.com",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_security_headers_applied() {
        let app = router(HttpResponse::new(200), MiddlewareConfig::secure());
        let response = app.oneshot(get("/health", "proxy.example.com")).await.unwrap();
        assert!(response.headers().contains_key(header::CONTENT_SECURITY_POLICY));
        assert_eq!(response.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    }

    #[tokio::test]
    async fn test_unknown_route_404() {
        let app = router(HttpResponse::new(200), MiddlewareConfig::none());
        let response = app.oneshot(get("/nope", "proxy.example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
