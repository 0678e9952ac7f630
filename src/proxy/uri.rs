//! Parsed proxy request URI.

use std::collections::HashMap;

use url::Url;

use super::error::ProxyError;
use super::params;

/// How the request's `v` parameter compares to the deployed fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriStatus {
    /// No version supplied.
    ValidUnversioned,
    /// Version matches; the response may be cached for a long time.
    ValidVersioned,
    /// Version supplied but stale.
    InvalidVersion,
}

/// An inbound proxy request's resource and directives.
#[derive(Debug, Clone)]
pub struct ProxyUri {
    resource: Url,
    container: String,
    gadget: Option<String>,
    refresh: Option<String>,
    status: UriStatus,
    query: HashMap<String, String>,
}

impl ProxyUri {
    /// Build from the inbound query parameters. `version_fingerprint` is the
    /// deployed resource version, if versioning is configured.
    pub fn process(
        query: &HashMap<String, String>,
        version_fingerprint: Option<&str>,
    ) -> Result<Self, ProxyError> {
        let raw = query
            .get(params::URL)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProxyError::InvalidParameter("no url parameter in request".into()))?;
        let resource = Url::parse(raw)
            .map_err(|e| ProxyError::InvalidParameter(format!("invalid url parameter: {e}")))?;

        let status = match query.get(params::VERSION).filter(|v| !v.is_empty()) {
            None => UriStatus::ValidUnversioned,
            Some(v) => match version_fingerprint {
                Some(expected) if expected != v => UriStatus::InvalidVersion,
                _ => UriStatus::ValidVersioned,
            },
        };

        Ok(Self {
            resource,
            container: query
                .get(params::CONTAINER)
                .filter(|c| !c.is_empty())
                .cloned()
                .unwrap_or_else(|| params::DEFAULT_CONTAINER.to_string()),
            gadget: query.get(params::GADGET).cloned(),
            refresh: query.get(params::REFRESH).cloned(),
            status,
            query: query.clone(),
        })
    }

    pub fn resource(&self) -> &Url {
        &self.resource
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn gadget(&self) -> Option<&str> {
        self.gadget.as_deref()
    }

    pub fn status(&self) -> UriStatus {
        self.status
    }

    /// Raw inbound query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Cache lifetime in seconds for the proxied response.
    ///
    /// An explicit `refresh` wins; otherwise a matching version gets
    /// `long_lived`, a stale one gets zero and an unversioned request gets
    /// `default`.
    pub fn translate_status_refresh(&self, long_lived: u64, default: u64) -> Result<u64, ProxyError> {
        if let Some(refresh) = &self.refresh {
            return refresh.trim().parse::<u64>().map_err(|_| {
                ProxyError::InvalidParameter(format!("invalid refresh parameter: {refresh}"))
            });
        }
        Ok(match self.status {
            UriStatus::ValidVersioned => long_lived,
            UriStatus::InvalidVersion => 0,
            UriStatus::ValidUnversioned => default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_url_is_invalid() {
        let err = ProxyUri::process(&query(&[("container", "c")]), None).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidParameter(_)));
        let err = ProxyUri::process(&query(&[("url", "")]), None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_relative_url_is_invalid() {
        assert!(ProxyUri::process(&query(&[("url", "/a.png")]), None).is_err());
    }

    #[test]
    fn test_defaults() {
        let uri = ProxyUri::process(&query(&[("url", "http://example.com/a.png")]), None).unwrap();
        assert_eq!(uri.container(), "default");
        assert_eq!(uri.gadget(), None);
        assert_eq!(uri.status(), UriStatus::ValidUnversioned);
        assert_eq!(uri.translate_status_refresh(100, 10).unwrap(), 10);
    }

    #[test]
    fn test_version_status() {
        let q = query(&[("url", "http://example.com/a.png"), ("v", "abc")]);
        let uri = ProxyUri::process(&q, Some("abc")).unwrap();
        assert_eq!(uri.translate_status_refresh(100, 10).unwrap(), 100);

        let uri = ProxyUri::process(&q, Some("def")).unwrap();
        assert_eq!(uri.status(), UriStatus::InvalidVersion);
        assert_eq!(uri.translate_status_refresh(100, 10).unwrap(), 0);

        let uri = ProxyUri::process(&q, None).unwrap();
        assert_eq!(uri.status(), UriStatus::ValidVersioned);
    }

    #[test]
    fn test_explicit_refresh() {
        let q = query(&[("url", "http://example.com/a.png"), ("v", "x"), ("refresh", "60")]);
        let uri = ProxyUri::process(&q, Some("y")).unwrap();
        assert_eq!(uri.translate_status_refresh(100, 10).unwrap(), 60);
    }

    #[test]
    fn test_bad_refresh_is_invalid() {
        for bad in ["-1", "soon", "1.5"] {
            let q = query(&[("url", "http://example.com/a.png"), ("refresh", bad)]);
            let uri = ProxyUri::process(&q, None).unwrap();
            assert!(matches!(
                uri.translate_status_refresh(100, 10),
                Err(ProxyError::InvalidParameter(_))
            ));
        }
    }
}
