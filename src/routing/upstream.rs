//! The single upstream target.
//!
//! Resolved once at startup from `upstream.url`. Only scheme, host and port
//! are kept: inbound paths are absolute and replace any base path.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Error returned when the configured upstream URL is unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("{0}")]
    Parse(String),

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,
}

/// Scheme of the upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    fn http(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn websocket(self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }
}

/// Immutable `{scheme, host, port}` of the upstream media server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl UpstreamTarget {
    /// Parse a base URL such as `https://media.example.com:8920/emby`.
    pub fn parse(raw: &str) -> Result<Self, UpstreamError> {
        let url = Url::parse(raw.trim()).map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(UpstreamError::UnsupportedScheme(other.to_string())),
        };

        // `host_str` keeps the brackets around IPv6 literals, which is what
        // both URLs and the Host header need.
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(UpstreamError::MissingHost)?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the outbound `Host` header; the port is omitted when it is
    /// the scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Absolute HTTP(S) URL for an inbound path and query.
    pub fn http_url(&self, path_and_query: &str) -> String {
        self.join(self.scheme.http(), path_and_query)
    }

    /// Absolute WS(S) URL for an inbound path and query.
    pub fn websocket_url(&self, path_and_query: &str) -> String {
        self.join(self.scheme.websocket(), path_and_query)
    }

    fn join(&self, scheme: &str, path_and_query: &str) -> String {
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.http(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_and_default_port() {
        let target = UpstreamTarget::parse("https://media.example.com/emby").unwrap();
        assert_eq!(target.scheme(), Scheme::Https);
        assert_eq!(target.host(), "media.example.com");
        assert_eq!(target.port(), 443);
        assert_eq!(target.authority(), "media.example.com");
    }

    #[test]
    fn explicit_port_is_kept_in_authority() {
        let target = UpstreamTarget::parse("http://10.0.0.5:8096").unwrap();
        assert_eq!(target.authority(), "10.0.0.5:8096");
        assert_eq!(target.to_string(), "http://10.0.0.5:8096");
    }

    #[test]
    fn base_path_is_replaced_by_inbound_path() {
        let target = UpstreamTarget::parse("http://10.0.0.5:8096/ignored/").unwrap();
        assert_eq!(
            target.http_url("/Users/1/Items?Limit=10"),
            "http://10.0.0.5:8096/Users/1/Items?Limit=10"
        );
        assert_eq!(
            target.websocket_url("/embywebsocket?api_key=abc"),
            "ws://10.0.0.5:8096/embywebsocket?api_key=abc"
        );
    }

    #[test]
    fn secure_upstream_uses_wss() {
        let target = UpstreamTarget::parse("https://media.example.com:8920").unwrap();
        assert_eq!(
            target.websocket_url("/embywebsocket"),
            "wss://media.example.com:8920/embywebsocket"
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(matches!(
            UpstreamTarget::parse("ftp://files.example.com"),
            Err(UpstreamError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            UpstreamTarget::parse("not a url"),
            Err(UpstreamError::Parse(_))
        ));
    }
}
