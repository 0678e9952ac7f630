//! Proxy error taxonomy.

use thiserror::Error;

/// Errors that abort a proxy request. Each maps to an HTTP status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {message}")]
    Internal { message: String, status: u16 },
}

impl ProxyError {
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidParameter(_) => 400,
            ProxyError::Forbidden(_) => 403,
            ProxyError::Internal { status, .. } => *status,
        }
    }
}

/// Failure reported by a response rewriter, with the status it wants sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rewriting failed: {message}")]
pub struct RewritingError {
    pub message: String,
    pub status: u16,
}

impl RewritingError {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

impl From<RewritingError> for ProxyError {
    fn from(e: RewritingError) -> Self {
        ProxyError::Internal {
            message: e.message,
            status: e.status,
        }
    }
}
