//! Testable server startup logic.
//!
//! [`build_app_state`] wires the proxy collaborators from an [`AppConfig`];
//! [`run_server_with_config`] binds and serves it and returns a
//! [`ServerHandle`] for shutting down. Integration tests bind port 0.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::proxy::{
    HostLockedDomainService, PipelineConfig, ProxyHandler, ProxyHandlerConfig, ReqwestPipeline,
    SanitizingResponseRewriter, SsrfPolicy,
};
use crate::rewrite::ProxyLinkConfig;
use crate::sanitizer::{
    ConservativeCssSanitizer, CssSanitizer, SanitizerPolicy, SanitizingGadgetRewriter,
};
use crate::server::headers::SecurityHeadersConfig;
use crate::server::http::{create_router, AppState, MiddlewareConfig};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid bind address {0}")]
    BindAddress(String),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to start a server.
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub state: AppState,
    pub middleware: MiddlewareConfig,
}

impl ServerConfig {
    /// `127.0.0.1:0` with no middleware.
    pub fn for_testing(state: AppState) -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            state,
            middleware: MiddlewareConfig::none(),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, StartupError> {
        let ip: IpAddr = config
            .server
            .bind
            .parse()
            .map_err(|_| StartupError::BindAddress(config.server.bind.clone()))?;
        let middleware = if config.server.security_headers {
            MiddlewareConfig {
                security_headers: Some(SecurityHeadersConfig::default()),
            }
        } else {
            MiddlewareConfig::none()
        };
        Ok(Self {
            bind_address: SocketAddr::new(ip, config.server.port),
            state: build_app_state(config),
            middleware,
        })
    }
}

fn link_config(config: &AppConfig) -> ProxyLinkConfig {
    ProxyLinkConfig {
        proxy_base: config.sanitizer.proxy_base.clone(),
        fingerprint: config.sanitizer.fingerprint.clone(),
        expires: config.sanitizer.expires,
    }
}

fn handler_config(config: &AppConfig, ssrf: SsrfPolicy) -> ProxyHandlerConfig {
    let proxy = &config.proxy;
    let forwarded_request_headers = proxy
        .forwarded_request_headers
        .iter()
        .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header) => Some(header),
            Err(_) => {
                warn!(target: "config", header = %name, "ignoring invalid forwarded header name");
                None
            }
        })
        .collect();

    ProxyHandlerConfig {
        long_lived_refresh_secs: proxy.long_lived_refresh_secs,
        default_refresh_secs: proxy.default_refresh_secs,
        disallowed_response_headers: proxy
            .disallowed_response_headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<HashSet<_>>(),
        forwarded_request_headers,
        ssrf,
        version_fingerprint: proxy.version_fingerprint.clone(),
    }
}

/// Proxy handler with the reqwest pipeline and the sanitizing rewriter
/// registry.
pub fn build_app_state(config: &AppConfig) -> AppState {
    let proxy = &config.proxy;
    let ssrf = SsrfPolicy {
        allow_private_networks: proxy.allow_private_networks,
    };
    let pipeline = ReqwestPipeline::new(
        PipelineConfig::default()
            .with_max_size(proxy.max_response_bytes)
            .with_timeout_ms(proxy.timeout_ms)
            .with_ssrf(ssrf),
    );
    let locked_domain = HostLockedDomainService::new(
        proxy.locked_domain.enabled,
        proxy.locked_domain.suffix.clone(),
    );
    let css: Arc<dyn CssSanitizer> = Arc::new(ConservativeCssSanitizer::new());
    let rewriters = SanitizingResponseRewriter::new(css, link_config(config));

    let handler = ProxyHandler::new(
        Arc::new(pipeline),
        Arc::new(locked_domain),
        Some(Arc::new(rewriters)),
        handler_config(config, ssrf),
    );
    AppState::new(Arc::new(handler))
}

/// Gadget render-pass sanitizer configured from the `sanitizer` section.
pub fn build_gadget_rewriter(config: &AppConfig) -> SanitizingGadgetRewriter {
    let policy = SanitizerPolicy::new(
        &config.sanitizer.allowed_tags,
        &config.sanitizer.allowed_attributes,
    );
    SanitizingGadgetRewriter::new(
        Arc::new(policy),
        Arc::new(ConservativeCssSanitizer::new()),
        link_config(config),
    )
}

/// Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait (up to 5s) for in-flight
    /// requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(target: "http", "server task returned error: {e}"),
            Ok(Err(e)) => error!(target: "http", "server task panicked: {e}"),
            Err(_) => warn!(target: "http", "server task did not finish within 5s"),
        }
    }
}

pub async fn run_server_with_config(config: ServerConfig) -> Result<ServerHandle, StartupError> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let app = create_router(config.state, config.middleware);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    info!(target: "http", "listening on http://{local_addr}");
    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
