//! Serde models of the external MCP registry format.
//!
//! These mirror the public registry's `server.json` schema and its list
//! API (`servers[]` + `metadata`). Unknown fields are ignored so newer
//! registries keep parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Package;

/// A single server description as published by an external registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryServerDetail {
    /// Optional so a missing name surfaces as a descriptive error instead of
    /// a bare serde message.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub packages: Option<Vec<Package>>,
    #[serde(default)]
    pub remotes: Option<Vec<Remote>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Remote {
    #[serde(rename = "type", default)]
    pub transport_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<HeaderInput>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaderInput {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// A listing item: server detail wrapped with publication metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerResponse {
    pub server: RegistryServerDetail,
    #[serde(rename = "_meta", default)]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseMeta {
    #[serde(rename = "io.modelcontextprotocol.registry/official", default)]
    pub official: Option<OfficialMeta>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialMeta {
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub is_latest: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One page of the remote list API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryServerList {
    #[serde(default)]
    pub servers: Option<Vec<ServerResponse>>,
    #[serde(default)]
    pub metadata: Option<ListMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListMetadata {
    #[serde(rename = "nextCursor", alias = "next_cursor", default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}
