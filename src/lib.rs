//! gadget-shield
//!
//! Sanitizes rendered gadget HTML against a tag/attribute whitelist and
//! serves a MIME-enforcing resource proxy for the links the sanitizer
//! rewrites.

pub mod cli;
pub mod config;
pub mod dom;
pub mod logging;
pub mod proxy;
pub mod rewrite;
pub mod sanitizer;
pub mod server;
pub mod uri;
