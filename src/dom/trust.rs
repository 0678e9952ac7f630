//! Trusted-content markers
//!
//! A marker on an element exempts it from sanitization:
//! - [`TrustMarker::OnlySelf`] keeps the element's own tag and attributes but
//!   still sanitizes its children.
//! - [`TrustMarker::All`] returns the whole subtree untouched.
//!
//! Markers are kept in a map beside the arena rather than on the node, so
//! anything that duplicates a node has to copy the entry itself. Inside this
//! crate that is [`Document::clone_node`], which calls
//! [`Document::propagate_trust`] for every node it copies.
//!
//! # Caller responsibility
//!
//! Once an element is marked `All`, nothing is checked below it. Never mark
//! an element that may later receive untrusted children.

use super::{Document, DomError, NodeId};

/// Sanitization bypass level for one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustMarker {
    #[default]
    None,
    OnlySelf,
    All,
}

impl Document {
    /// Mark an element as trusted content. With `including_children` the
    /// entire subtree is trusted.
    pub fn bypass_sanitization(
        &mut self,
        element: NodeId,
        including_children: bool,
    ) -> Result<(), DomError> {
        if !self.is_element(element) {
            return Err(DomError::NotAnElement(element));
        }
        let marker = if including_children {
            TrustMarker::All
        } else {
            TrustMarker::OnlySelf
        };
        self.trust.insert(element, marker);
        Ok(())
    }

    /// Marker for `id`; unmarked nodes read as [`TrustMarker::None`].
    pub fn trust_marker(&self, id: NodeId) -> TrustMarker {
        self.trust.get(&id).copied().unwrap_or_default()
    }

    /// Copy the marker of `src` onto `dst`. Must be invoked by every routine
    /// that duplicates a node.
    pub fn propagate_trust(&mut self, src: NodeId, dst: NodeId) {
        match self.trust.get(&src).copied() {
            Some(marker) => {
                self.trust.insert(dst, marker);
            }
            None => {
                self.trust.remove(&dst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_attrs() -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    #[test]
    fn test_unmarked_reads_none() {
        let mut doc = Document::new();
        let div = doc.create_element("div", no_attrs());
        assert_eq!(doc.trust_marker(div), TrustMarker::None);
    }

    #[test]
    fn test_bypass_levels() {
        let mut doc = Document::new();
        let a = doc.create_element("div", no_attrs());
        let b = doc.create_element("div", no_attrs());
        doc.bypass_sanitization(a, true).unwrap();
        doc.bypass_sanitization(b, false).unwrap();
        assert_eq!(doc.trust_marker(a), TrustMarker::All);
        assert_eq!(doc.trust_marker(b), TrustMarker::OnlySelf);
    }

    #[test]
    fn test_bypass_rejects_non_elements() {
        let mut doc = Document::new();
        let text = doc.create_text("hi");
        assert_eq!(
            doc.bypass_sanitization(text, true),
            Err(DomError::NotAnElement(text))
        );
    }

    #[test]
    fn test_marker_survives_shallow_clone() {
        let mut doc = Document::new();
        let div = doc.create_element("div", no_attrs());
        doc.bypass_sanitization(div, false).unwrap();
        let copy = doc.clone_node(div, false).unwrap();
        assert_eq!(doc.trust_marker(copy), TrustMarker::OnlySelf);
    }

    #[test]
    fn test_markers_survive_deep_clone_per_node() {
        let mut doc = Document::new();
        let outer = doc.create_element("div", no_attrs());
        let plain = doc.create_element("span", no_attrs());
        let trusted = doc.create_element("b", no_attrs());
        doc.append(outer, plain).unwrap();
        doc.append(outer, trusted).unwrap();
        doc.bypass_sanitization(outer, false).unwrap();
        doc.bypass_sanitization(trusted, true).unwrap();

        let copy = doc.clone_node(outer, true).unwrap();
        let kids = doc.children(copy).to_vec();
        assert_eq!(doc.trust_marker(copy), TrustMarker::OnlySelf);
        assert_eq!(doc.trust_marker(kids[0]), TrustMarker::None);
        assert_eq!(doc.trust_marker(kids[1]), TrustMarker::All);
    }

    #[test]
    fn test_propagate_clears_stale_marker() {
        let mut doc = Document::new();
        let src = doc.create_element("div", no_attrs());
        let dst = doc.create_element("div", no_attrs());
        doc.bypass_sanitization(dst, true).unwrap();
        doc.propagate_trust(src, dst);
        assert_eq!(doc.trust_marker(dst), TrustMarker::None);
    }
}
