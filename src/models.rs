//! Core data models used throughout the registry index.
//!
//! Every external server description (seed file, single JSON document,
//! remote registry listing) is normalized into a [`CanonicalRecord`]. The
//! index itself only ever deals in [`IndexEntry`] values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Internal protocol tag for servers launched from a package over stdio.
pub const PROTOCOL_STDIO: &str = "stdio";
/// Internal protocol tag for servers reachable over server-sent events.
pub const PROTOCOL_SSE: &str = "mcp-sse";
/// Internal protocol tag for servers reachable over streamable HTTP.
pub const PROTOCOL_STREAMABLE: &str = "mcp-streamable";

/// Transport names used by the external registry format.
pub const TRANSPORT_SSE: &str = "sse";
pub const TRANSPORT_STREAMABLE: &str = "streamable-http";

/// Endpoint type recorded on endpoints imported from remotes.
pub const FRONT_ENDPOINT_TYPE_TO_BACK: &str = "BACKEND";
/// Endpoint spec type for a fixed `address:port` endpoint.
pub const ENDPOINT_TYPE_DIRECT: &str = "DIRECT";

pub const STATUS_ACTIVE: &str = "active";

/// Location of one server inside the partitioned store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub partition: String,
    pub name: String,
    pub id: String,
}

impl IndexEntry {
    pub fn new(partition: impl Into<String>, name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            name: name.into(),
            id: id.into(),
        }
    }
}

/// One page of results plus the counts needed to page further.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub page_number: usize,
    pub pages_available: usize,
}

impl<T> PageResult<T> {
    /// Build a page, deriving `pages_available` as `ceil(total / page_size)`.
    pub fn new(items: Vec<T>, total_count: usize, page_number: usize, page_size: usize) -> Self {
        Self {
            items,
            total_count,
            page_number,
            pages_available: pages_for(total_count, page_size),
        }
    }
}

pub fn pages_for(total_count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total_count.div_ceil(page_size)
}

/// The normalized shape every imported server converges to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` when no packages are present and the first remote uses an
    /// unrecognised transport.
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub front_protocol: Option<String>,
    pub status: String,
    #[serde(default)]
    pub version_detail: Option<VersionDetail>,
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub remote_config: Option<RemoteConfig>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub tool_spec: Option<Value>,
}

impl CanonicalRecord {
    /// Version string, if the source carried one.
    pub fn version(&self) -> Option<&str> {
        self.version_detail.as_ref().map(|v| v.version.as_str())
    }

    pub fn is_stdio(&self) -> bool {
        self.protocol.as_deref() == Some(PROTOCOL_STDIO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetail {
    pub version: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub is_latest: Option<bool>,
}

/// Endpoint-based server configuration built from the source's remotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Path of the first remote; `/` when that remote has none.
    pub export_path: String,
    pub endpoints: Vec<RemoteEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    /// `host:port`, with the port defaulted from the scheme when absent.
    pub host_port: String,
    pub path: String,
    /// Transport type as given by the source (`sse`, `streamable-http`, ...).
    pub transport_type: Option<String>,
    /// URL scheme (`http`, `https`).
    pub protocol: Option<String>,
    pub endpoint_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A package from which a stdio server can be launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default)]
    pub registry_type: Option<String>,
    #[serde(default)]
    pub registry_base_url: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub file_sha256: Option<String>,
    #[serde(default)]
    pub runtime_hint: Option<String>,
    #[serde(default)]
    pub runtime_arguments: Vec<Value>,
    #[serde(default)]
    pub package_arguments: Vec<Value>,
    #[serde(default)]
    pub environment_variables: Vec<Value>,
    #[serde(default)]
    pub transport: Option<Value>,
}

/// Endpoint spec handed to the record writer for endpoint-based servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSpec {
    pub kind: String,
    pub address: String,
    pub port: String,
    pub protocol: Option<String>,
}
