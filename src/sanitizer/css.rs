//! Stylesheet sanitization
//!
//! The sanitizer hands every `<style>` element to a [`CssSanitizer`] together
//! with a link rewriter for `url(...)` references. The bundled
//! [`ConservativeCssSanitizer`] works on the text with regexes; it strips
//! known-dangerous constructs rather than validating the grammar.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;
use url::Url;

use crate::dom::{Document, DomError, NodeId};
use crate::rewrite::LinkRewriter;

#[derive(Error, Debug)]
pub enum CssError {
    #[error("style element is not usable: {0}")]
    Dom(#[from] DomError),

    #[error("stylesheet rejected: {0}")]
    Rejected(String),
}

/// Sanitizes CSS found in gadget content or fetched through the proxy.
pub trait CssSanitizer: Send + Sync {
    /// Sanitize the text of a `<style>` element in place.
    fn sanitize_style(
        &self,
        doc: &mut Document,
        style: NodeId,
        context: &Url,
        rewriter: &dyn LinkRewriter,
    ) -> Result<(), CssError> {
        let css = doc.text_content(style);
        let cleaned = self.sanitize_stylesheet(&css, context, rewriter)?;
        doc.set_text_content(style, cleaned)?;
        Ok(())
    }

    /// Sanitize a standalone stylesheet.
    fn sanitize_stylesheet(
        &self,
        css: &str,
        context: &Url,
        rewriter: &dyn LinkRewriter,
    ) -> Result<String, CssError>;
}

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)@import[^;]*(;|$)").unwrap());

// A declaration is anything between separators that carries a script hook.
// Backslash escapes are dropped along with them since they can spell any
// of the keywords.
static DANGEROUS_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[^;{}]*(expression\s*\(|behavior|-moz-binding|javascript:|\\)[^;{}]*;?")
        .unwrap()
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)]*?))\s*\)"#).unwrap()
});

/// Regex-based sanitizer that removes `@import`, script-bearing
/// declarations and markup breakouts, and proxies every `url(...)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeCssSanitizer;

impl ConservativeCssSanitizer {
    pub fn new() -> Self {
        Self
    }
}

impl CssSanitizer for ConservativeCssSanitizer {
    fn sanitize_stylesheet(
        &self,
        css: &str,
        context: &Url,
        rewriter: &dyn LinkRewriter,
    ) -> Result<String, CssError> {
        // `<` never appears in valid CSS outside strings and would let the
        // text close its <style> element.
        let css = css.replace('<', "");
        let css = COMMENT_RE.replace_all(&css, "");
        let css = IMPORT_RE.replace_all(&css, "");
        let css = DANGEROUS_DECL_RE.replace_all(&css, "");
        let css = URL_RE.replace_all(&css, |caps: &Captures<'_>| {
            let link = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let rewritten = rewriter.rewrite(link, context).replace('"', "%22");
            format!("url(\"{rewritten}\")")
        });
        Ok(css.into_owned())
    }
}
