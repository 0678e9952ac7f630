//! Strict URI-reference parsing
//!
//! `url::Url::join` happily percent-encodes spaces and other junk into a
//! relative path, so a value like `not a url` would "resolve". Attribute
//! values and rewritten links must instead be rejected unless they are
//! well-formed RFC 3986 references, which is what this module checks before
//! handing the value to the `url` crate.

use thiserror::Error;
use url::Url;

/// Base used only to validate relative references.
const VALIDATION_BASE: &str = "http://validation.invalid/";

/// Characters that may never appear unescaped in a URI reference.
const FORBIDDEN: &[char] = &['"', '<', '>', '\\', '^', '`', '{', '|', '}'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("illegal character {0:?} in URI")]
    IllegalCharacter(char),

    #[error("malformed percent-escape in URI")]
    BadEscape,

    #[error("malformed scheme in URI")]
    BadScheme,

    #[error("unparseable URI: {0}")]
    Parse(#[from] url::ParseError),
}

/// A validated, possibly relative URI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriRef {
    raw: String,
    scheme: Option<String>,
}

impl UriRef {
    /// Parse and validate a URI reference.
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        check_characters(raw)?;
        let scheme = scheme_of(raw)?;
        match scheme {
            Some(_) => {
                Url::parse(raw)?;
            }
            None => {
                // Infallible: the base is a constant.
                let base = Url::parse(VALIDATION_BASE)?;
                base.join(raw)?;
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme,
        })
    }

    /// Lowercased scheme, `None` for relative references.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve against `base`.
    pub fn resolve(&self, base: &Url) -> Result<Url, UriError> {
        Ok(base.join(&self.raw)?)
    }
}

fn check_characters(raw: &str) -> Result<(), UriError> {
    let bytes = raw.as_bytes();
    for (i, c) in raw.char_indices() {
        if c.is_whitespace() || c.is_control() || FORBIDDEN.contains(&c) {
            return Err(UriError::IllegalCharacter(c));
        }
        if c == '%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(UriError::BadEscape);
            }
        }
    }
    Ok(())
}

/// Scheme per RFC 3986: `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`,
/// only when the colon precedes any `/`, `?` or `#`.
fn scheme_of(raw: &str) -> Result<Option<String>, UriError> {
    let end = raw.find(['/', '?', '#']).unwrap_or(raw.len());
    let Some(colon) = raw[..end].find(':') else {
        return Ok(None);
    };
    let candidate = &raw[..colon];
    let mut chars = candidate.chars();
    let well_formed = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !well_formed {
        return Err(UriError::BadScheme);
    }
    Ok(Some(candidate.to_ascii_lowercase()))
}
