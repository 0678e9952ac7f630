//! Typed configuration sections and their defaults.
//!
//! Every section deserialises with `#[serde(default)]`, so a partial file
//! still yields a complete [`AppConfig`]. [`apply_defaults`] fills the same
//! defaults into the raw JSON value so `config show` prints the effective
//! settings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ConfigError;
use crate::proxy::{
    DEFAULT_REFRESH_SECS, DISALLOWED_RESPONSE_HEADERS, FORWARDED_REQUEST_HEADERS,
    LONG_LIVED_REFRESH_SECS,
};
use crate::proxy::fetch::{DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_SIZE};
use crate::sanitizer::policy::{DEFAULT_ALLOWED_ATTRIBUTES, DEFAULT_ALLOWED_TAGS};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8089;
pub const DEFAULT_LOCKED_DOMAIN_SUFFIX: &str = "-a.example.com";
pub const DEFAULT_PROXY_BASE: &str = "/gadgets/proxy";
pub const DEFAULT_FINGERPRINT: &str = "0";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub proxy: ProxySection,
    pub sanitizer: SanitizerSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Deserialise from an already loaded config value.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::ValidationError {
            path: ".".to_string(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    pub security_headers: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            security_headers: true,
        }
    }
}

// ---------------------------------------------------------------------------
// proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySection {
    pub long_lived_refresh_secs: u64,
    pub default_refresh_secs: u64,
    pub timeout_ms: u64,
    pub max_response_bytes: u64,
    pub locked_domain: LockedDomainSection,
    pub allow_private_networks: bool,
    pub disallowed_response_headers: Vec<String>,
    pub forwarded_request_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_fingerprint: Option<String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            long_lived_refresh_secs: LONG_LIVED_REFRESH_SECS,
            default_refresh_secs: DEFAULT_REFRESH_SECS,
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_response_bytes: DEFAULT_MAX_SIZE,
            locked_domain: LockedDomainSection::default(),
            allow_private_networks: false,
            disallowed_response_headers: to_strings(DISALLOWED_RESPONSE_HEADERS),
            forwarded_request_headers: to_strings(FORWARDED_REQUEST_HEADERS),
            version_fingerprint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockedDomainSection {
    pub enabled: bool,
    pub suffix: String,
}

impl Default for LockedDomainSection {
    fn default() -> Self {
        Self {
            enabled: false,
            suffix: DEFAULT_LOCKED_DOMAIN_SUFFIX.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// sanitizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SanitizerSection {
    pub allowed_tags: Vec<String>,
    pub allowed_attributes: Vec<String>,
    pub proxy_base: String,
    pub fingerprint: String,
    /// Seconds, emitted as `refresh` on proxied links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

impl Default for SanitizerSection {
    fn default() -> Self {
        Self {
            allowed_tags: to_strings(DEFAULT_ALLOWED_TAGS),
            allowed_attributes: to_strings(DEFAULT_ALLOWED_ATTRIBUTES),
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            fingerprint: DEFAULT_FINGERPRINT.to_string(),
            expires: None,
        }
    }
}

// ---------------------------------------------------------------------------
// logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Plaintext,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormatSetting,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormatSetting::default(),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Fill missing sections and fields of a raw config value. Values present
/// in `config` always win.
pub fn apply_defaults(config: &mut Value) {
    if !config.is_object() {
        *config = Value::Object(serde_json::Map::new());
    }

    let typed = match AppConfig::from_value(config) {
        Ok(typed) => typed,
        Err(e) => {
            debug!(target: "config", "deserialization failed, using all defaults: {e}");
            AppConfig::default()
        }
    };
    let defaults = serde_json::to_value(&typed).unwrap_or_default();
    merge_defaults(config, defaults);
}

fn merge_defaults(target: &mut Value, defaults: Value) {
    if let (Value::Object(target_obj), Value::Object(defaults_obj)) = (target, defaults) {
        for (key, default_value) in defaults_obj {
            match target_obj.get_mut(&key) {
                Some(existing) => merge_defaults(existing, default_value),
                None => {
                    target_obj.insert(key, default_value);
                }
            }
        }
    }
}
