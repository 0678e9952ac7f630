//! HTTP server: routes, security headers and startup.

pub mod headers;
pub mod http;
pub mod startup;

pub use http::{create_router, AppState, MiddlewareConfig, PROXY_PATH};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
