//! SSRF protection for proxy targets
//!
//! Rejects fetch targets that point into the proxy's own network:
//! - IPv4 private ranges: 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
//! - loopback, link-local, CGNAT (100.64.0.0/10), multicast, reserved and
//!   documentation ranges
//! - IPv6 loopback, unspecified, ULA (fc00::/7), link-local, multicast,
//!   documentation, and IPv4-mapped forms of the above
//! - localhost names and cloud metadata hosts
//!
//! Checking the literal URL is not enough on its own. [`super::fetch`]
//! resolves the host, runs [`SsrfPolicy::validate_resolved_ip`] on every
//! address and connects to the validated one.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("scheme not allowed: {0}")]
    SchemeNotAllowed(String),

    #[error("blocked: {0}")]
    Blocked(String),
}

/// Target policy for proxied fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SsrfPolicy {
    /// Skip address checks entirely. For deployments proxying an intranet.
    pub allow_private_networks: bool,
}

impl SsrfPolicy {
    pub fn permissive() -> Self {
        Self {
            allow_private_networks: true,
        }
    }

    /// Parse `url` and validate it.
    pub fn validate_str(&self, url: &str) -> Result<Url, SsrfError> {
        let parsed = Url::parse(url).map_err(|e| SsrfError::InvalidUrl(format!("{url}: {e}")))?;
        self.validate_url(&parsed)?;
        Ok(parsed)
    }

    /// Validate the scheme and literal host of `url`.
    pub fn validate_url(&self, url: &Url) -> Result<(), SsrfError> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(SsrfError::SchemeNotAllowed(scheme.to_string())),
        }

        let host = url
            .host()
            .ok_or_else(|| SsrfError::InvalidUrl("no host in URL".to_string()))?;

        if self.allow_private_networks {
            return Ok(());
        }

        match host {
            Host::Domain(name) => {
                let name = name.to_ascii_lowercase();
                if is_localhost_name(&name) {
                    return Err(SsrfError::Blocked(format!("localhost address: {name}")));
                }
                if is_metadata_name(&name) {
                    return Err(SsrfError::Blocked(format!("cloud metadata endpoint: {name}")));
                }
            }
            Host::Ipv4(ip) => self.check_ip(&IpAddr::V4(ip))?,
            Host::Ipv6(ip) => self.check_ip(&IpAddr::V6(ip))?,
        }
        Ok(())
    }

    /// Validate one DNS answer for `host`. Must run before connecting.
    pub fn validate_resolved_ip(&self, ip: &IpAddr, host: &str) -> Result<(), SsrfError> {
        if self.allow_private_networks || !is_private_ip(ip) {
            return Ok(());
        }
        Err(SsrfError::Blocked(format!(
            "DNS {host} resolved to private IP: {ip}"
        )))
    }

    fn check_ip(&self, ip: &IpAddr) -> Result<(), SsrfError> {
        if is_private_ip(ip) {
            return Err(SsrfError::Blocked(format!("private IP address: {ip}")));
        }
        Ok(())
    }
}

fn is_localhost_name(host: &str) -> bool {
    host == "localhost" || host == "localhost.localdomain" || host.ends_with(".localhost")
}

fn is_metadata_name(host: &str) -> bool {
    host == "instance-data"
        || host == "metadata"
        || host == "metadata.google.internal"
        || host.ends_with(".internal")
}

/// Whether `ip` is loopback, private, link-local or otherwise not a
/// public unicast address.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || a == 127
        // link-local, includes 169.254.169.254
        || (a == 169 && b == 254)
        || a == 0
        // CGNAT
        || (a == 100 && (64..=127).contains(&b))
        || (a == 192 && b == 0 && c == 0)
        || (a == 192 && b == 0 && c == 2)
        || (a == 198 && b == 51 && c == 100)
        || (a == 203 && b == 0 && c == 113)
        // multicast and reserved
        || a >= 224
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let s = ip.segments();
    if *ip == Ipv6Addr::LOCALHOST || *ip == Ipv6Addr::UNSPECIFIED {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&v4);
    }
    (s[0] & 0xfe00) == 0xfc00
        || (s[0] & 0xffc0) == 0xfe80
        || (s[0] & 0xff00) == 0xff00
        || (s[0] == 0x2001 && s[1] == 0x0db8)
}
