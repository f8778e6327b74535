//! Manual decomposition of remote URLs into endpoint parts.
//!
//! Registry data regularly contains URLs a strict parser would reject
//! (bare `host:port` forms, odd ports), yet they are still navigable, so
//! parsing is a small three-step scan instead of a URL library:
//!
//! 1. Split on the first `://` for the scheme (absent when not found or
//!    when the input starts with it).
//! 2. Split the rest on the first `/`: left is `host[:port]`, right
//!    (including the `/`) is the path. No `/` past position 0 means no path.
//! 3. Split the host segment on its last `:`; a non-numeric suffix keeps
//!    the whole segment as the host and leaves the port unset. A numeric
//!    suffix is kept as written, even outside the TCP range; zero or a
//!    negative value falls back to the scheme's default port.

use anyhow::{bail, Result};

use crate::models::{CanonicalRecord, EndpointSpec, ENDPOINT_TYPE_DIRECT};

pub const DEFAULT_HTTP_PORT: i64 = 80;
pub const DEFAULT_HTTPS_PORT: i64 = 443;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: Option<String>,
    pub host: String,
    pub port: Option<i64>,
    pub path: Option<String>,
}

impl UrlParts {
    /// Port to use: the explicit one, else 443 for `https` and 80 otherwise.
    pub fn effective_port(&self) -> i64 {
        match self.port {
            Some(port) if port > 0 => port,
            _ => {
                if self.is_https() {
                    DEFAULT_HTTPS_PORT
                } else {
                    DEFAULT_HTTP_PORT
                }
            }
        }
    }

    pub fn is_https(&self) -> bool {
        self.scheme
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("https"))
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

pub fn parse_url(url: &str) -> UrlParts {
    let mut rest = url;
    let mut scheme = None;
    if let Some(idx) = rest.find("://") {
        if idx > 0 {
            scheme = Some(rest[..idx].to_string());
            rest = &rest[idx + 3..];
        }
    }

    let (host_part, path) = match rest.find('/') {
        Some(idx) if idx > 0 => (&rest[..idx], Some(rest[idx..].to_string())),
        _ => (rest, None),
    };

    let (host, port) = match host_part.rfind(':') {
        Some(idx) if idx > 0 => match host_part[idx + 1..].parse::<i64>() {
            Ok(port) => (host_part[..idx].to_string(), Some(port)),
            Err(_) => (host_part.to_string(), None),
        },
        _ => (host_part.to_string(), None),
    };

    UrlParts {
        scheme,
        host,
        port,
        path,
    }
}

/// Build the endpoint spec for a record's first remote endpoint.
///
/// Stdio records and records without endpoints have none. The endpoint's
/// `host:port` must split into exactly two parts on `:`.
pub fn to_endpoint_spec(record: &CanonicalRecord) -> Result<Option<EndpointSpec>> {
    if record.is_stdio() {
        return Ok(None);
    }
    let first = match record
        .remote_config
        .as_ref()
        .and_then(|rc| rc.endpoints.first())
    {
        Some(ep) => ep,
        None => return Ok(None),
    };

    let parts: Vec<&str> = first.host_port.split(':').collect();
    if parts.len() != 2 {
        bail!("Invalid endpoint data: {}", first.host_port);
    }
    Ok(Some(EndpointSpec {
        kind: ENDPOINT_TYPE_DIRECT.to_string(),
        address: parts[0].to_string(),
        port: parts[1].to_string(),
        protocol: first.protocol.clone(),
    }))
}
