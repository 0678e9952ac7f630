//! Tag and attribute whitelists.

use std::collections::{HashMap, HashSet};

/// Tags allowed in sanitized output by default.
pub const DEFAULT_ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "area", "b", "bdo", "big", "blockquote", "body", "br", "caption",
    "center", "cite", "code", "col", "colgroup", "dd", "del", "dfn", "div", "dl", "dt", "em",
    "font", "h1", "h2", "h3", "h4", "h5", "h6", "head", "hr", "html", "i", "img", "ins", "legend",
    "li", "map", "ol", "p", "pre", "q", "s", "samp", "small", "span", "strike", "strong", "style",
    "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "tt", "u", "ul",
];

/// Attributes allowed in sanitized output by default.
pub const DEFAULT_ALLOWED_ATTRIBUTES: &[&str] = &[
    "abbr", "align", "alt", "axis", "bgcolor", "border", "cellpadding", "cellspacing", "char",
    "charoff", "cite", "class", "clear", "color", "cols", "colspan", "compact", "coords",
    "datetime", "dir", "face", "headers", "height", "href", "hreflang", "hspace", "id", "ismap",
    "lang", "longdesc", "name", "nohref", "noshade", "nowrap", "rel", "rev", "rowspan", "rules",
    "scope", "shape", "size", "span", "src", "start", "summary", "tabindex", "target", "title",
    "type", "valign", "value", "vspace", "width",
];

/// Attributes whose values are URIs.
pub const URI_ATTRIBUTES: &[&str] = &["href", "src"];

/// Schemes a URI attribute may carry. Relative references are also allowed.
pub const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

fn lowercase_set<I, S>(items: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_ascii_lowercase())
        .collect()
}

/// Immutable whitelist configuration for one sanitizer.
///
/// All lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizerPolicy {
    allowed_tags: HashSet<String>,
    allowed_attributes: HashSet<String>,
    uri_attributes: HashSet<String>,
    /// tag -> attributes that must always go through the image proxy
    proxied_image_attributes: HashMap<String, HashSet<String>>,
}

impl SanitizerPolicy {
    pub fn new<T, A, S1, S2>(allowed_tags: T, allowed_attributes: A) -> Self
    where
        T: IntoIterator<Item = S1>,
        A: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let mut proxied_image_attributes = HashMap::new();
        proxied_image_attributes.insert("img".to_string(), lowercase_set(["src"]));
        Self {
            allowed_tags: lowercase_set(allowed_tags),
            allowed_attributes: lowercase_set(allowed_attributes),
            uri_attributes: lowercase_set(URI_ATTRIBUTES),
            proxied_image_attributes,
        }
    }

    /// Force `tag`'s `attribute` through the image proxy.
    pub fn with_proxied_image_attribute(mut self, tag: &str, attribute: &str) -> Self {
        self.proxied_image_attributes
            .entry(tag.to_ascii_lowercase())
            .or_default()
            .insert(attribute.to_ascii_lowercase());
        self
    }

    pub fn is_allowed_tag(&self, tag: &str) -> bool {
        self.allowed_tags.contains(&tag.to_ascii_lowercase())
    }

    pub fn is_allowed_attribute(&self, name: &str) -> bool {
        self.allowed_attributes.contains(&name.to_ascii_lowercase())
    }

    pub fn is_uri_attribute(&self, name: &str) -> bool {
        self.uri_attributes.contains(&name.to_ascii_lowercase())
    }

    pub fn is_proxied_image_attribute(&self, tag: &str, attribute: &str) -> bool {
        self.proxied_image_attributes
            .get(&tag.to_ascii_lowercase())
            .is_some_and(|attrs| attrs.contains(&attribute.to_ascii_lowercase()))
    }

    /// `None` is a relative reference and always allowed.
    pub fn is_allowed_scheme(&self, scheme: Option<&str>) -> bool {
        match scheme {
            None => true,
            Some(s) => ALLOWED_SCHEMES.iter().any(|a| a.eq_ignore_ascii_case(s)),
        }
    }
}

impl Default for SanitizerPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TAGS, DEFAULT_ALLOWED_ATTRIBUTES)
    }
}
