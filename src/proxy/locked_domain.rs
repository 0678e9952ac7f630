//! Locked-domain check for the open proxy.
//!
//! With locked domains each gadget renders on its own host under a shared
//! suffix. The proxy must never answer on one of those hosts, or fetched
//! content would run with that gadget's origin.

use super::LockedDomainService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLockedDomainService {
    enabled: bool,
    suffix: String,
}

impl HostLockedDomainService {
    pub fn new(enabled: bool, suffix: impl Into<String>) -> Self {
        Self {
            enabled,
            suffix: suffix.into().to_ascii_lowercase(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, "")
    }
}

impl LockedDomainService for HostLockedDomainService {
    fn is_safe_for_open_proxy(&self, host: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(host) = host else {
            return false;
        };
        let name = strip_port(host).to_ascii_lowercase();
        self.suffix.is_empty() || !name.ends_with(&self.suffix)
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_allows_everything() {
        let svc = HostLockedDomainService::disabled();
        assert!(svc.is_safe_for_open_proxy(None));
        assert!(svc.is_safe_for_open_proxy(Some("g1-a.example.com")));
    }

    #[test]
    fn test_gadget_hosts_rejected() {
        let svc = HostLockedDomainService::new(true, "-a.example.com");
        assert!(!svc.is_safe_for_open_proxy(Some("abc123-a.example.com")));
        assert!(!svc.is_safe_for_open_proxy(Some("ABC123-A.EXAMPLE.COM:8080")));
        assert!(svc.is_safe_for_open_proxy(Some("proxy.example.com")));
        assert!(svc.is_safe_for_open_proxy(Some("proxy.example.com:443")));
        assert!(!svc.is_safe_for_open_proxy(None));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("host:80"), "host");
        assert_eq!(strip_port("host"), "host");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
    }
}
