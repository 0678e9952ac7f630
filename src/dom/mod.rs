//! Arena-backed document tree
//!
//! The sanitizer operates on an already-parsed document. Nodes live in a
//! single vector and refer to each other by [`NodeId`]; removing a node only
//! detaches it from its parent, so ids held by a caller stay valid for the
//! lifetime of the [`Document`].
//!
//! Per-node trust markers are not stored on the nodes themselves. They live
//! in an out-of-band map keyed by [`NodeId`] (see [`trust`]) and every
//! duplication routine copies the entries explicitly.

pub mod trust;

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

pub use trust::TrustMarker;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text children are emitted without entity escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Errors from tree manipulation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} does not exist in this document")]
    UnknownNode(NodeId),

    #[error("node {0:?} has no parent")]
    Detached(NodeId),

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
}

/// Index of a node in the document arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single attribute. Names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// Document root.
    Document,
    /// Element with its tag name (case preserved) and attributes.
    Element { name: String, attrs: Vec<Attribute> },
    Text(String),
    CData(String),
    /// Named entity reference such as `&nbsp;` (the name, without `&` and `;`).
    EntityReference(String),
    Comment(String),
    /// Anything else the upstream parser produced (doctype, processing
    /// instruction, ...). Serialized verbatim.
    Other(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Parsed document owned by exactly one sanitization pass at a time.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    trust: HashMap<NodeId, TrustMarker>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only the document root.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            trust: HashMap::new(),
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(data));
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.index()).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(DomError::UnknownNode(id))
    }

    /// The document root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// First element child of the document root, if any.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|&child| self.is_element(child))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a detached element. Attribute names are lowercased.
    pub fn create_element<I, K, V>(&mut self, name: &str, attrs: I) -> NodeId
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let attrs = attrs
            .into_iter()
            .map(|(k, v)| Attribute {
                name: k.as_ref().to_ascii_lowercase(),
                value: v.into(),
            })
            .collect();
        self.alloc(NodeData::Element {
            name: name.to_string(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeData::Text(text.into()))
    }

    pub fn create_cdata(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeData::CData(text.into()))
    }

    pub fn create_entity_reference(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(NodeData::EntityReference(name.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeData::Comment(text.into()))
    }

    pub fn create_other(&mut self, raw: impl Into<String>) -> NodeId {
        self.alloc(NodeData::Other(raw.into()))
    }

    /// Append `child` as the last child of `parent`, detaching it from any
    /// previous parent first.
    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.node(parent)?;
        if self.node(child)?.parent.is_some() {
            self.remove(child)?;
        }
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Node payload, or `None` for an id from another document.
    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.index()).map(|n| &n.data)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// Live child list. Callers that mutate the tree while iterating must
    /// take a copy first.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::Element { .. }))
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            Some(NodeData::Element { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match self.data(id) {
            Some(NodeData::Element { attrs, .. }) => attrs.as_slice(),
            _ => &[],
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    fn attrs_mut(&mut self, id: NodeId) -> Result<&mut Vec<Attribute>, DomError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element { attrs, .. } => Ok(attrs),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    /// Set (or add) an attribute on an element.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        let attrs = self.attrs_mut(id)?;
        match attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => attrs.push(Attribute { name, value }),
        }
        Ok(())
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool, DomError> {
        let attrs = self.attrs_mut(id)?;
        let before = attrs.len();
        attrs.retain(|a| !a.name.eq_ignore_ascii_case(name));
        Ok(attrs.len() != before)
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(t)) | Some(NodeData::CData(t)) => out.push_str(t),
            _ => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace every child of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: impl Into<String>) -> Result<(), DomError> {
        let old = std::mem::take(&mut self.node_mut(id)?.children);
        for child in old {
            self.node_mut(child)?.parent = None;
        }
        let text = self.create_text(text);
        self.append(id, text)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Detach `id` (and thereby its subtree) from its parent.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        let parent = self.node(id)?.parent.ok_or(DomError::Detached(id))?;
        self.node_mut(parent)?.children.retain(|&c| c != id);
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    /// Duplicate a node, returning the detached copy.
    ///
    /// Trust markers are copied onto every duplicated node; with `deep` the
    /// whole subtree is duplicated and each child copy receives its source's
    /// marker as well.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> Result<NodeId, DomError> {
        let data = self.node(id)?.data.clone();
        let copy = self.alloc(data);
        self.propagate_trust(id, copy);
        if deep {
            let children = self.node(id)?.children.clone();
            for child in children {
                let child_copy = self.clone_node(child, true)?;
                self.append(copy, child_copy)?;
            }
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize the whole document as HTML.
    pub fn to_html(&self) -> String {
        self.node_to_html(self.root)
    }

    /// Serialize one node and its subtree as HTML.
    pub fn node_to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, false, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, raw_text: bool, out: &mut String) {
        let Some(data) = self.data(id) else {
            return;
        };
        match data {
            NodeData::Document => {
                for &child in self.children(id) {
                    self.write_node(child, false, out);
                }
            }
            NodeData::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for attr in attrs {
                    let _ = write!(out, " {}=\"{}\"", attr.name, escape_attr(&attr.value));
                }
                out.push('>');
                let lower = name.to_ascii_lowercase();
                if VOID_ELEMENTS.contains(&lower.as_str()) && self.children(id).is_empty() {
                    return;
                }
                let raw = RAW_TEXT_ELEMENTS.contains(&lower.as_str());
                for &child in self.children(id) {
                    self.write_node(child, raw, out);
                }
                let _ = write!(out, "</{}>", name);
            }
            // HTML has no CDATA sections outside foreign content; the text is
            // written as ordinary character data.
            NodeData::Text(text) | NodeData::CData(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeData::EntityReference(name) => {
                if is_entity_name(name) {
                    let _ = write!(out, "&{};", name);
                } else {
                    let _ = write!(out, "&amp;{};", escape_text(name));
                }
            }
            NodeData::Comment(text) => {
                let _ = write!(out, "<!--{}-->", text);
            }
            NodeData::Other(raw) => out.push_str(raw),
        }
    }
}

/// `name`, `#123` or `#x1F`.
fn is_entity_name(name: &str) -> bool {
    if let Some(num) = name.strip_prefix('#') {
        return match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        };
    }
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let div = doc.create_element("div", [("ID", "main")]);
        let p = doc.create_element("p", Vec::<(&str, &str)>::new());
        let text = doc.create_text("a < b");
        doc.append(doc.root(), div).unwrap();
        doc.append(div, p).unwrap();
        doc.append(p, text).unwrap();
        (doc, div, p)
    }

    #[test]
    fn test_attribute_names_lowercased() {
        let (doc, div, _) = sample();
        assert_eq!(doc.attributes(div)[0].name, "id");
        assert_eq!(doc.attribute(div, "Id"), Some("main"));
    }

    #[test]
    fn test_serialize_escapes_text_and_attrs() {
        let mut doc = Document::new();
        let a = doc.create_element("a", [("title", "say \"hi\" & bye")]);
        let t = doc.create_text("1 < 2 & 3");
        doc.append(doc.root(), a).unwrap();
        doc.append(a, t).unwrap();
        assert_eq!(
            doc.to_html(),
            "<a title=\"say &quot;hi&quot; &amp; bye\">1 &lt; 2 &amp; 3</a>"
        );
    }

    #[test]
    fn test_serialize_void_and_raw_text() {
        let mut doc = Document::new();
        let body = doc.create_element("body", Vec::<(&str, &str)>::new());
        let img = doc.create_element("img", [("src", "x.png")]);
        let style = doc.create_element("style", Vec::<(&str, &str)>::new());
        let css = doc.create_text("a > b { color: red }");
        doc.append(doc.root(), body).unwrap();
        doc.append(body, img).unwrap();
        doc.append(body, style).unwrap();
        doc.append(style, css).unwrap();
        assert_eq!(
            doc.to_html(),
            "<body><img src=\"x.png\"><style>a > b { color: red }</style></body>"
        );
    }

    #[test]
    fn test_cdata_serialized_as_text() {
        let mut doc = Document::new();
        let div = doc.create_element("div", Vec::<(&str, &str)>::new());
        let cdata = doc.create_cdata("x><img src=x onerror=alert(1)>");
        doc.append(doc.root(), div).unwrap();
        doc.append(div, cdata).unwrap();
        assert_eq!(
            doc.to_html(),
            "<div>x&gt;&lt;img src=x onerror=alert(1)&gt;</div>"
        );
    }

    #[test]
    fn test_entity_reference_names_checked() {
        let mut doc = Document::new();
        let p = doc.create_element("p", Vec::<(&str, &str)>::new());
        doc.append(doc.root(), p).unwrap();
        for name in ["nbsp", "#160", "#xA0", "amp;<script>alert(1)</script><b", "#x", "1a"] {
            let entity = doc.create_entity_reference(name);
            doc.append(p, entity).unwrap();
        }
        assert_eq!(
            doc.to_html(),
            "<p>&nbsp;&#160;&#xA0;&amp;amp;&lt;script&gt;alert(1)&lt;/script&gt;&lt;b;&amp;#x;&amp;1a;</p>"
        );
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let (mut doc, div, p) = sample();
        doc.remove(p).unwrap();
        assert!(doc.children(div).is_empty());
        assert_eq!(doc.parent(p), None);
        assert_eq!(doc.to_html(), "<div id=\"main\"></div>");
    }

    #[test]
    fn test_remove_detached_node_fails() {
        let mut doc = Document::new();
        let orphan = doc.create_text("x");
        assert_eq!(doc.remove(orphan), Err(DomError::Detached(orphan)));
    }

    #[test]
    fn test_append_reparents() {
        let (mut doc, div, p) = sample();
        let root = doc.root();
        doc.append(root, p).unwrap();
        assert!(doc.children(div).is_empty());
        assert_eq!(doc.parent(p), Some(root));
    }

    #[test]
    fn test_deep_clone_copies_structure() {
        let (mut doc, div, _) = sample();
        let copy = doc.clone_node(div, true).unwrap();
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.node_to_html(copy), doc.node_to_html(div));
        assert_ne!(doc.children(copy)[0], doc.children(div)[0]);
    }

    #[test]
    fn test_shallow_clone_has_no_children() {
        let (mut doc, div, _) = sample();
        let copy = doc.clone_node(div, false).unwrap();
        assert!(doc.children(copy).is_empty());
        assert_eq!(doc.attribute(copy, "id"), Some("main"));
    }

    #[test]
    fn test_set_text_content_replaces_children() {
        let (mut doc, _, p) = sample();
        doc.set_text_content(p, "fresh").unwrap();
        assert_eq!(doc.children(p).len(), 1);
        assert_eq!(doc.text_content(p), "fresh");
    }

    #[test]
    fn test_set_and_remove_attribute() {
        let (mut doc, div, p) = sample();
        doc.set_attribute(div, "Class", "x").unwrap();
        assert_eq!(doc.attribute(div, "class"), Some("x"));
        doc.set_attribute(div, "class", "y").unwrap();
        assert_eq!(doc.attributes(div).len(), 2);
        assert!(doc.remove_attribute(div, "CLASS").unwrap());
        assert!(!doc.remove_attribute(div, "class").unwrap());
        let text = doc.children(p)[0];
        assert_eq!(
            doc.set_attribute(text, "a", "b"),
            Err(DomError::NotAnElement(text))
        );
    }

    #[test]
    fn test_document_element() {
        let (doc, div, _) = sample();
        assert_eq!(doc.document_element(), Some(div));
        assert_eq!(Document::new().document_element(), None);
    }
}
