//! Configuration loading
//!
//! The config file is JSON5. Two directives are resolved before the typed
//! sections in [`defaults`] are read:
//!
//! - `"$include": "other.json5"` (or an array of paths) merges other files,
//!   relative to the including file. Sibling keys override included ones.
//! - `"${VAR}"` inside any string is replaced by the environment variable
//!   `VAR`; `"$${VAR}"` yields a literal `${VAR}`.
//!
//! A missing file is not an error: every section falls back to its default.

pub mod defaults;

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

pub use defaults::AppConfig;

/// Nested `$include` chains deeper than this are rejected.
const MAX_INCLUDE_DEPTH: usize = 10;

pub const CONFIG_PATH_ENV: &str = "GADGET_SHIELD_CONFIG_PATH";

const INCLUDE_KEY: &str = "$include";

const KNOWN_SECTIONS: &[&str] = &["server", "proxy", "sanitizer", "logging"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Circular include detected: {path}")]
    CircularInclude { path: String },

    #[error("Include depth exceeded (max {max}): {path}")]
    IncludeDepthExceeded { path: String, max: usize },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Include file not found: {path}")]
    IncludeNotFound { path: String },

    #[error("$include must be a string or an array of strings at {path}")]
    InvalidIncludeDirective { path: String },

    #[error("Included content must be an object when merged with sibling keys at {path}")]
    IncludeMustBeObject { path: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// `$GADGET_SHIELD_CONFIG_PATH`, else `~/.gadget-shield/config.json5`
/// (or `config.json` when no `.json5` file exists).
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gadget-shield");
    let json5 = dir.join("config.json5");
    if json5.exists() {
        json5
    } else {
        dir.join("config.json")
    }
}

/// Load the config from [`get_config_path`] with defaults applied.
pub fn load_config() -> Result<Value, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load `path`, resolve includes and env vars, then apply defaults.
pub fn load_config_from(path: &Path) -> Result<Value, ConfigError> {
    let mut value = if path.exists() {
        let mut root = read_json5(path)?;
        let mut visited = HashSet::from([canonical(path)]);
        resolve_includes(&mut root, path, &mut visited, 0)?;
        substitute_env_vars(&mut root)?;
        root
    } else {
        tracing::debug!(target: "config", path = %path.display(), "no config file, using defaults");
        Value::Object(Map::new())
    };

    defaults::apply_defaults(&mut value);
    Ok(value)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn read_json5(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_json5(&content, path)
}

fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn resolve_includes(
    value: &mut Value,
    file: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<(), ConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeDepthExceeded {
            path: file.display().to_string(),
            max: MAX_INCLUDE_DEPTH,
        });
    }

    match value {
        Value::Object(obj) => {
            if let Some(directive) = obj.remove(INCLUDE_KEY) {
                let mut merged = Value::Object(Map::new());
                for relative in get_include_paths(&directive, file)? {
                    let included = load_include(file, &relative, visited, depth)?;
                    deep_merge(&mut merged, included);
                }

                if !obj.is_empty() {
                    if !merged.is_object() {
                        return Err(ConfigError::IncludeMustBeObject {
                            path: file.display().to_string(),
                        });
                    }
                    deep_merge(&mut merged, Value::Object(std::mem::take(obj)));
                }
                *value = merged;
            }

            if let Value::Object(obj) = value {
                for child in obj.values_mut() {
                    resolve_includes(child, file, visited, depth)?;
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                resolve_includes(item, file, visited, depth)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn load_include(
    parent: &Path,
    relative: &str,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Value, ConfigError> {
    let path = parent.parent().unwrap_or(Path::new(".")).join(relative);
    let key = canonical(&path);

    if visited.contains(&key) {
        return Err(ConfigError::CircularInclude {
            path: path.display().to_string(),
        });
    }
    if !path.exists() {
        return Err(ConfigError::IncludeNotFound {
            path: path.display().to_string(),
        });
    }
    visited.insert(key);

    let mut included = read_json5(&path)?;
    resolve_includes(&mut included, &path, visited, depth + 1)?;
    Ok(included)
}

fn get_include_paths(directive: &Value, file: &Path) -> Result<Vec<String>, ConfigError> {
    let invalid = || ConfigError::InvalidIncludeDirective {
        path: file.display().to_string(),
    };
    match directive {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

/// Objects merge recursively, arrays concatenate, anything else is replaced.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                match base_obj.get_mut(&key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => {
                        base_obj.insert(key, overlay_value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => base_items.extend(overlay_items),
        (base, overlay) => *base = overlay,
    }
}

fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => *s = substitute_env_in_string(s)?,
        Value::Object(obj) => {
            for child in obj.values_mut() {
                substitute_env_vars(child)?;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace `${VAR}` (upper-case names only); `$${VAR}` is an escape.
fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

    let mut missing = None;
    let replaced = ENV_VAR.replace_all(s, |caps: &Captures<'_>| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env::var(name) {
            Ok(v) => v,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar { var }),
        None => Ok(replaced.into_owned()),
    }
}

/// A non-fatal problem found in a loaded config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Report unknown top-level sections and non-numeric numeric fields.
pub fn validate_config(config: &Value) -> Vec<ValidationIssue> {
    const NUMERIC_FIELDS: &[(&str, &str)] = &[
        ("server", "port"),
        ("proxy", "longLivedRefreshSecs"),
        ("proxy", "defaultRefreshSecs"),
        ("proxy", "timeoutMs"),
        ("proxy", "maxResponseBytes"),
        ("sanitizer", "expires"),
    ];

    let Value::Object(obj) = config else {
        return vec![ValidationIssue {
            path: ".".to_string(),
            message: "Config root must be an object".to_string(),
        }];
    };

    let mut issues: Vec<ValidationIssue> = obj
        .keys()
        .filter(|key| !KNOWN_SECTIONS.contains(&key.as_str()))
        .map(|key| ValidationIssue {
            path: format!(".{key}"),
            message: format!("Unknown configuration key: {key}"),
        })
        .collect();

    for (section, field) in NUMERIC_FIELDS {
        let value = obj.get(*section).and_then(|s| s.get(*field));
        if let Some(v) = value {
            if !v.is_number() && !v.is_null() {
                issues.push(ValidationIssue {
                    path: format!(".{section}.{field}"),
                    message: format!("{field} must be a number"),
                });
            }
        }
    }

    issues
}
