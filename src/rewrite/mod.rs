//! Link rewriting
//!
//! Every resource a sanitized gadget references is routed through the proxy
//! endpoint. [`ProxyingLinkRewriter`] builds the proxied URL;
//! [`SanitizingProxyingLinkRewriter`] wraps it and pins the sanitize flag and
//! the expected MIME class onto every link it emits.

use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::proxy::params;
use crate::uri::UriRef;

/// Returned for links that cannot be parsed.
pub const PLACEHOLDER_URL: &str = "about:blank";

/// MIME class pinned on stylesheet links.
pub const CSS_MIME: &str = "text/css";

/// MIME class pinned on image links.
pub const IMAGE_MIME: &str = "image/*";

/// Rewrites a link found in gadget content.
pub trait LinkRewriter: Send + Sync {
    /// `context` is the URL the link was found in; relative links resolve
    /// against it.
    fn rewrite(&self, link: &str, context: &Url) -> String;
}

/// Settings shared by all proxied links of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLinkConfig {
    /// Path or absolute URL of the proxy endpoint.
    pub proxy_base: String,
    /// Cache-busting fingerprint emitted as `fp`.
    pub fingerprint: String,
    /// Optional refresh window, in seconds.
    pub expires: Option<u64>,
}

impl Default for ProxyLinkConfig {
    fn default() -> Self {
        Self {
            proxy_base: "/gadgets/proxy".to_string(),
            fingerprint: "0".to_string(),
            expires: None,
        }
    }
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Routes links through the proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyingLinkRewriter {
    gadget_uri: Url,
    container: String,
    config: ProxyLinkConfig,
}

impl ProxyingLinkRewriter {
    pub fn new(gadget_uri: Url, container: impl Into<String>, config: ProxyLinkConfig) -> Self {
        Self {
            gadget_uri,
            container: container.into(),
            config,
        }
    }

    /// Proxied form of an already-resolved URL.
    pub fn proxied(&self, resolved: &Url) -> String {
        let separator = if self.config.proxy_base.contains('?') {
            '&'
        } else {
            '?'
        };
        let mut out = format!(
            "{base}{separator}{container}={c}&{gadget}={g}&{fp}={f}",
            base = self.config.proxy_base,
            container = params::CONTAINER,
            c = encode(&self.container),
            gadget = params::GADGET,
            g = encode(self.gadget_uri.as_str()),
            fp = params::FINGERPRINT,
            f = encode(&self.config.fingerprint),
        );
        if let Some(expires) = self.config.expires {
            out.push_str(&format!("&{}={}", params::REFRESH, expires));
        }
        out.push_str(&format!("&{}={}", params::URL, encode(resolved.as_str())));
        out
    }
}

impl LinkRewriter for ProxyingLinkRewriter {
    fn rewrite(&self, link: &str, context: &Url) -> String {
        match context.join(link) {
            Ok(resolved) => self.proxied(&resolved),
            Err(_) => link.to_string(),
        }
    }
}

/// Proxying rewriter that forces `sanitize=1` and a MIME constraint onto
/// every link, and replaces unparseable links with [`PLACEHOLDER_URL`].
#[derive(Debug, Clone)]
pub struct SanitizingProxyingLinkRewriter {
    inner: ProxyingLinkRewriter,
    expected_mime: String,
}

impl SanitizingProxyingLinkRewriter {
    pub fn new(inner: ProxyingLinkRewriter, expected_mime: impl Into<String>) -> Self {
        Self {
            inner,
            expected_mime: expected_mime.into(),
        }
    }

    pub fn for_css(inner: ProxyingLinkRewriter) -> Self {
        Self::new(inner, CSS_MIME)
    }

    pub fn for_images(inner: ProxyingLinkRewriter) -> Self {
        Self::new(inner, IMAGE_MIME)
    }

    pub fn expected_mime(&self) -> &str {
        &self.expected_mime
    }
}

impl LinkRewriter for SanitizingProxyingLinkRewriter {
    fn rewrite(&self, link: &str, context: &Url) -> String {
        let resolved = match UriRef::parse(link).and_then(|uri| uri.resolve(context)) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(target: "sanitizer", error = %e, "unparseable link replaced");
                return PLACEHOLDER_URL.to_string();
            }
        };
        // The MIME value is appended as-is.
        format!(
            "{}&{}=1&{}={}",
            self.inner.proxied(&resolved),
            params::SANITIZE,
            params::REWRITE_MIME,
            self.expected_mime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ProxyingLinkRewriter {
        ProxyingLinkRewriter::new(
            Url::parse("http://gadgets.example.com/g.xml").unwrap(),
            "default",
            ProxyLinkConfig::default(),
        )
    }

    fn ctx() -> Url {
        Url::parse("http://gadgets.example.com/dir/g.xml").unwrap()
    }

    #[test]
    fn test_base_rewrite_format() {
        let out = base().rewrite("a.png", &ctx());
        assert_eq!(
            out,
            "/gadgets/proxy?container=default\
             &gadget=http%3A%2F%2Fgadgets.example.com%2Fg.xml\
             &fp=0\
             &url=http%3A%2F%2Fgadgets.example.com%2Fdir%2Fa.png"
        );
    }

    #[test]
    fn test_base_rewrite_with_refresh_and_query_base() {
        let rewriter = ProxyingLinkRewriter::new(
            Url::parse("http://g.example.com/g.xml").unwrap(),
            "my container",
            ProxyLinkConfig {
                proxy_base: "https://proxy.example.com/p?x=1".into(),
                fingerprint: "abc".into(),
                expires: Some(600),
            },
        );
        let out = rewriter.rewrite("http://cdn.example.com/s.css", &ctx());
        assert!(out.starts_with("https://proxy.example.com/p?x=1&container=my+container&"));
        assert!(out.contains("&fp=abc&refresh=600&url="));
    }

    #[test]
    fn test_sanitizing_appends_pinned_params() {
        let out = SanitizingProxyingLinkRewriter::for_images(base()).rewrite("/i.gif", &ctx());
        assert!(out.ends_with("&sanitize=1&rewriteMime=image/*"), "{out}");
        assert!(out.contains("url=http%3A%2F%2Fgadgets.example.com%2Fi.gif"));

        let out = SanitizingProxyingLinkRewriter::for_css(base()).rewrite("s.css", &ctx());
        assert!(out.ends_with("&sanitize=1&rewriteMime=text/css"));
    }

    #[test]
    fn test_unparseable_link_becomes_placeholder() {
        let rewriter = SanitizingProxyingLinkRewriter::for_images(base());
        assert_eq!(rewriter.rewrite("not a url", &ctx()), PLACEHOLDER_URL);
        assert_eq!(rewriter.rewrite("http://[::1", &ctx()), PLACEHOLDER_URL);
    }

    #[test]
    fn test_same_origin_still_proxied() {
        let rewriter = SanitizingProxyingLinkRewriter::for_images(base());
        let out = rewriter.rewrite("http://gadgets.example.com/dir/a.png", &ctx());
        assert!(out.starts_with("/gadgets/proxy?"));
    }
}
