//! Recursive tree filter.

use url::Url;

use super::css::CssSanitizer;
use super::policy::SanitizerPolicy;
use super::SanitizeError;
use crate::dom::{Document, NodeData, NodeId, TrustMarker};
use crate::rewrite::LinkRewriter;
use crate::uri::UriRef;

/// Deepest nesting the sanitizer will walk.
pub const MAX_DEPTH: usize = 256;

/// Filters one document against a policy. Created per render pass.
pub struct NodeSanitizer<'a> {
    policy: &'a SanitizerPolicy,
    css: &'a dyn CssSanitizer,
    css_rewriter: &'a dyn LinkRewriter,
    image_rewriter: &'a dyn LinkRewriter,
    context: &'a Url,
}

impl<'a> NodeSanitizer<'a> {
    pub fn new(
        policy: &'a SanitizerPolicy,
        css: &'a dyn CssSanitizer,
        css_rewriter: &'a dyn LinkRewriter,
        image_rewriter: &'a dyn LinkRewriter,
        context: &'a Url,
    ) -> Self {
        Self {
            policy,
            css,
            css_rewriter,
            image_rewriter,
            context,
        }
    }

    /// Sanitize `node` and everything below it.
    pub fn sanitize(&self, doc: &mut Document, node: NodeId) -> Result<(), SanitizeError> {
        self.visit(doc, node, 0)
    }

    fn visit(&self, doc: &mut Document, node: NodeId, depth: usize) -> Result<(), SanitizeError> {
        if depth > MAX_DEPTH {
            return Err(SanitizeError::DepthExceeded(MAX_DEPTH));
        }
        let tag = match doc.data(node) {
            None => return Err(SanitizeError::UnknownNode(node)),
            Some(NodeData::Text(_) | NodeData::CData(_) | NodeData::EntityReference(_)) => {
                return Ok(())
            }
            Some(NodeData::Document) => return self.visit_children(doc, node, depth),
            Some(NodeData::Element { name, .. }) => name.to_ascii_lowercase(),
            Some(NodeData::Comment(_) | NodeData::Other(_)) => {
                doc.remove(node)?;
                return Ok(());
            }
        };

        match doc.trust_marker(node) {
            TrustMarker::All => Ok(()),
            TrustMarker::OnlySelf => self.visit_children(doc, node, depth),
            TrustMarker::None => {
                if !self.policy.is_allowed_tag(&tag) {
                    tracing::trace!(target: "sanitizer", tag = %tag, "removing element");
                    doc.remove(node)?;
                    return Ok(());
                }
                if tag == "style" {
                    self.css
                        .sanitize_style(doc, node, self.context, self.css_rewriter)?;
                }
                self.filter_attributes(doc, node, &tag)?;
                self.visit_children(doc, node, depth)
            }
        }
    }

    fn visit_children(
        &self,
        doc: &mut Document,
        node: NodeId,
        depth: usize,
    ) -> Result<(), SanitizeError> {
        // Removal mutates the live child list.
        let children = doc.children(node).to_vec();
        for child in children {
            self.visit(doc, child, depth + 1)?;
        }
        Ok(())
    }

    fn filter_attributes(
        &self,
        doc: &mut Document,
        node: NodeId,
        tag: &str,
    ) -> Result<(), SanitizeError> {
        let attrs = doc.attributes(node).to_vec();
        for attr in attrs {
            if !self.policy.is_allowed_attribute(&attr.name) {
                doc.remove_attribute(node, &attr.name)?;
                continue;
            }
            if !self.policy.is_uri_attribute(&attr.name) {
                continue;
            }
            let uri = match UriRef::parse(&attr.value) {
                Ok(uri) => uri,
                Err(e) => {
                    tracing::debug!(
                        target: "sanitizer",
                        attribute = %attr.name,
                        error = %e,
                        "dropping unparseable URI attribute"
                    );
                    doc.remove_attribute(node, &attr.name)?;
                    continue;
                }
            };
            if !self.policy.is_allowed_scheme(uri.scheme()) {
                doc.remove_attribute(node, &attr.name)?;
            } else if self.policy.is_proxied_image_attribute(tag, &attr.name) {
                let proxied = self.image_rewriter.rewrite(uri.as_str(), self.context);
                doc.set_attribute(node, &attr.name, proxied)?;
            }
        }
        Ok(())
    }
}
