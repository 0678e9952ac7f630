//! Gadget content sanitization
//!
//! [`SanitizingGadgetRewriter`] is the render-pass entry point. When the
//! gadget's request asks for sanitized output it walks the parsed document,
//! removes everything not on the [`SanitizerPolicy`] whitelist, routes
//! `<style>` text through a [`CssSanitizer`] and forces image sources
//! through the MIME-enforcing proxy.
//!
//! A pass either completes or the content is replaced with nothing. Errors
//! and panics inside the walk both end in empty output.

pub mod css;
pub mod node;
pub mod policy;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::dom::{Document, DomError, NodeId};
use crate::rewrite::{ProxyLinkConfig, ProxyingLinkRewriter, SanitizingProxyingLinkRewriter};

pub use css::{ConservativeCssSanitizer, CssError, CssSanitizer};
pub use node::{NodeSanitizer, MAX_DEPTH};
pub use policy::SanitizerPolicy;

/// Request parameter that turns on sanitized rendering.
pub const SANITIZE_PARAM: &str = "sanitize";

#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("content has no parsed document")]
    NoDocument,

    #[error("node {0:?} does not belong to this document")]
    UnknownNode(NodeId),

    #[error("tree deeper than {0} levels")]
    DepthExceeded(usize),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("style sanitization failed: {0}")]
    Css(#[from] CssError),
}

/// Request-scoped render context.
#[derive(Debug, Clone, Default)]
pub struct GadgetContext {
    container: String,
    params: HashMap<String, String>,
}

impl GadgetContext {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A gadget being rendered.
#[derive(Debug, Clone)]
pub struct Gadget {
    spec_url: Url,
    context: GadgetContext,
}

impl Gadget {
    pub fn new(spec_url: Url, context: GadgetContext) -> Self {
        Self { spec_url, context }
    }

    pub fn spec_url(&self) -> &Url {
        &self.spec_url
    }

    pub fn context(&self) -> &GadgetContext {
        &self.context
    }

    /// Whether this render asked for sanitized output (`sanitize=1`).
    pub fn sanitize_output(&self) -> bool {
        self.context.parameter(SANITIZE_PARAM) == Some("1")
    }
}

/// Rendered gadget content: a parsed document, a raw string, or both.
#[derive(Debug, Clone, Default)]
pub struct MutableContent {
    content: String,
    document: Option<Document>,
    revision: u64,
}

impl MutableContent {
    pub fn from_document(document: Document) -> Self {
        Self {
            content: String::new(),
            document: Some(document),
            revision: 0,
        }
    }

    pub fn from_string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            document: None,
            revision: 0,
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.as_mut()
    }

    /// Record that the document was modified in place.
    pub fn document_changed(&mut self) {
        self.revision += 1;
    }

    /// Replace the content wholesale. Any parsed document is discarded.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.document = None;
        self.revision += 1;
    }

    /// Current content, serialized from the document when there is one.
    pub fn content(&self) -> String {
        match &self.document {
            Some(doc) => doc.to_html(),
            None => self.content.clone(),
        }
    }

    /// Number of recorded changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Render-pass rewriter producing sanitized gadget output.
pub struct SanitizingGadgetRewriter {
    policy: Arc<SanitizerPolicy>,
    css: Arc<dyn CssSanitizer>,
    links: ProxyLinkConfig,
}

impl SanitizingGadgetRewriter {
    pub fn new(
        policy: Arc<SanitizerPolicy>,
        css: Arc<dyn CssSanitizer>,
        links: ProxyLinkConfig,
    ) -> Self {
        Self { policy, css, links }
    }

    /// Sanitize `content` if `gadget` requested it. On any failure the
    /// content is emptied.
    pub fn rewrite(&self, gadget: &Gadget, content: &mut MutableContent) {
        if !gadget.sanitize_output() {
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| self.sanitize(gadget, content)));
        match outcome {
            Ok(Ok(())) => content.document_changed(),
            Ok(Err(e)) => {
                tracing::warn!(
                    target: "sanitizer",
                    gadget = %gadget.spec_url(),
                    error = %e,
                    "sanitization failed, emptying output"
                );
                content.set_content("");
            }
            Err(_) => {
                tracing::warn!(
                    target: "sanitizer",
                    gadget = %gadget.spec_url(),
                    "sanitizer panicked, emptying output"
                );
                content.set_content("");
            }
        }
    }

    fn sanitize(&self, gadget: &Gadget, content: &mut MutableContent) -> Result<(), SanitizeError> {
        let doc = content.document_mut().ok_or(SanitizeError::NoDocument)?;
        let base = ProxyingLinkRewriter::new(
            gadget.spec_url().clone(),
            gadget.context().container(),
            self.links.clone(),
        );
        let css_rewriter = SanitizingProxyingLinkRewriter::for_css(base.clone());
        let image_rewriter = SanitizingProxyingLinkRewriter::for_images(base);
        let root = doc.root();
        NodeSanitizer::new(
            &self.policy,
            self.css.as_ref(),
            &css_rewriter,
            &image_rewriter,
            gadget.spec_url(),
        )
        .sanitize(doc, root)
    }
}
