//! Default response rewriter registry.
//!
//! Only acts on requests that asked for sanitization. Stylesheets are run
//! through the CSS sanitizer; anything declared as an image must look like
//! one; every other type is emptied.

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use super::error::RewritingError;
use super::http::{HttpRequest, HttpResponse};
use super::ResponseRewriterRegistry;
use crate::rewrite::{ProxyLinkConfig, ProxyingLinkRewriter, SanitizingProxyingLinkRewriter};
use crate::sanitizer::CssSanitizer;

/// Recognise common image formats by magic bytes.
pub fn sniff_image(body: &[u8]) -> Option<&'static str> {
    if body.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if body.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("image/jpeg")
    } else if body.len() >= 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WEBP" {
        Some("image/webp")
    } else if body.starts_with(b"BM") {
        Some("image/bmp")
    } else if body.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some("image/x-icon")
    } else {
        None
    }
}

pub struct SanitizingResponseRewriter {
    css: Arc<dyn CssSanitizer>,
    links: ProxyLinkConfig,
}

impl SanitizingResponseRewriter {
    pub fn new(css: Arc<dyn CssSanitizer>, links: ProxyLinkConfig) -> Self {
        Self { css, links }
    }

    fn rewrite_css(&self, request: &HttpRequest, body: &[u8]) -> Result<Bytes, RewritingError> {
        let css = std::str::from_utf8(body)
            .map_err(|_| RewritingError::new("stylesheet is not valid UTF-8", 500))?;
        let gadget = request
            .gadget
            .as_deref()
            .and_then(|g| Url::parse(g).ok())
            .unwrap_or_else(|| request.uri.clone());
        let rewriter = SanitizingProxyingLinkRewriter::for_css(ProxyingLinkRewriter::new(
            gadget,
            request.container.clone(),
            self.links.clone(),
        ));
        let cleaned = self
            .css
            .sanitize_stylesheet(css, &request.uri, &rewriter)
            .map_err(|e| RewritingError::new(e.to_string(), 500))?;
        Ok(Bytes::from(cleaned))
    }
}

impl ResponseRewriterRegistry for SanitizingResponseRewriter {
    fn rewrite_response(
        &self,
        request: &HttpRequest,
        mut response: HttpResponse,
    ) -> Result<HttpResponse, RewritingError> {
        if !request.sanitization_requested {
            return Ok(response);
        }
        let mime = request
            .rewrite_mime_type
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if mime.starts_with("text/css") {
            response.body = self.rewrite_css(request, &response.body)?;
        } else if mime.starts_with("image/") {
            if sniff_image(&response.body).is_none() {
                tracing::debug!(
                    target: "proxy",
                    url = %request.uri,
                    "body is not a recognised image, dropping"
                );
                response.body = Bytes::new();
            }
        } else {
            response.body = Bytes::new();
        }
        Ok(response)
    }
}
