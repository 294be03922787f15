//! Request-line parsing and target resolution.
//!
//! # Responsibilities
//! - Split the request line into method, target, and version
//! - Resolve CONNECT authorities (`host[:port]`, default port 443)
//! - Resolve absolute-form URLs (`http://` → 80, `https://` → 443)
//!
//! # Design Decisions
//! - Origin-form targets (`/path`) fall back to the Host header over plain HTTP
//! - Anything unresolvable is a `MalformedMessage`, answered with a 400

use std::fmt;

use url::Url;

use crate::error::{ProxyError, Result};
use crate::http::message::{find_header, start_line};

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

/// `METHOD target HTTP/x.y`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn parse(head: &[u8]) -> Result<Self> {
        let line = start_line(head);
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None) if version.starts_with("HTTP/") => {
                Ok(Self {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(ProxyError::malformed(format!("invalid request line {:?}", line))),
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }
}

/// Where an outbound connection goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Wrap the TCP connection in TLS.
    pub tls: bool,
}

impl Target {
    /// Resolve the target of a forwarded request.
    ///
    /// CONNECT authorities resolve with `tls` set to `connect_tls`.
    pub fn for_request(line: &RequestLine, head: &[u8], connect_tls: bool) -> Result<Self> {
        if line.is_connect() {
            return Self::from_authority(&line.target, HTTPS_PORT, connect_tls);
        }
        if line.target.starts_with('/') {
            let host = find_header(head, "host")
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ProxyError::malformed("origin-form request without Host header"))?;
            return Self::from_authority(&host, HTTP_PORT, false);
        }
        Self::from_url(&line.target)
    }

    /// Parse `host[:port]`, including bracketed IPv6 literals.
    pub fn from_authority(authority: &str, default_port: u16, tls: bool) -> Result<Self> {
        let invalid = || ProxyError::malformed(format!("invalid authority {:?}", authority));

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match authority.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                Some(_) => return Err(invalid()),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Parse an absolute-form `http://` or `https://` URL.
    pub fn from_url(target: &str) -> Result<Self> {
        let url = Url::parse(target)
            .map_err(|e| ProxyError::malformed(format!("invalid request URL {:?}: {}", target, e)))?;

        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ProxyError::malformed(format!("unsupported scheme {:?}", other)));
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::malformed(format!("request URL {:?} has no host", target)))?;
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { HTTPS_PORT } else { HTTP_PORT });

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            tls,
        })
    }

    /// `host:port` suitable for dialing.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "tls" } else { "tcp" };
        write!(f, "{}://{}", scheme, self.authority())
    }
}
