//! External registry adaptor.
//!
//! Converts third-party MCP server descriptions into [`CanonicalRecord`]s.
//! Three input shapes are supported, selected by an explicit [`ImportType`]:
//!
//! | Type | Input | Result |
//! |------|-------|--------|
//! | `file` | JSON array of server details (a registry seed file) | one record per element |
//! | `json` | a single server detail object | one record |
//! | `url` | base URL of a registry list API | one page, or every page when `limit = -1` |
//!
//! Every shape goes through the same normalization ([`normalize_detail`]).
//!
//! # Pagination
//!
//! In fetch-all mode the adaptor follows `metadata.nextCursor` with a fixed
//! page size until the cursor disappears or `max_pages` pages have been
//! read. The guard bounds remotes that never stop returning a cursor. Any
//! failed page aborts the whole fetch and discards what was collected.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AdaptorConfig;
use crate::endpoint::parse_url;
use crate::error::{RegistryError, RegistryResult};
use crate::fetch::HttpFetcher;
use crate::models::{
    CanonicalRecord, RemoteConfig, RemoteEndpoint, VersionDetail, FRONT_ENDPOINT_TYPE_TO_BACK,
    PROTOCOL_SSE, PROTOCOL_STDIO, PROTOCOL_STREAMABLE, STATUS_ACTIVE, TRANSPORT_SSE,
    TRANSPORT_STREAMABLE,
};
use crate::wire::{RegistryServerDetail, RegistryServerList, Remote, ServerResponse};

/// `limit` value that switches URL imports to fetch-all mode.
pub const FETCH_ALL_LIMIT: i64 = -1;

/// Namespace for name-derived record ids.
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d63_7072_6567_4a8e_9b1d_2c5f_7e30_a4b1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportType {
    File,
    Json,
    Url,
}

impl ImportType {
    pub fn parse(value: &str) -> RegistryResult<Self> {
        match value {
            "file" => Ok(Self::File),
            "json" => Ok(Self::Json),
            "url" => Ok(Self::Url),
            other => Err(RegistryError::invalid(format!(
                "Unsupported import type: '{}'. Must be one of: json, url, file",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Json => "json",
            Self::Url => "url",
        }
    }
}

/// Input to [`ExternalAdaptor::adapt`]. `cursor`, `limit` and `search` only
/// apply to [`ImportType::Url`].
#[derive(Debug, Clone)]
pub struct AdaptRequest<'a> {
    pub import_type: ImportType,
    pub data: &'a str,
    pub cursor: Option<&'a str>,
    pub limit: Option<i64>,
    pub search: Option<&'a str>,
}

impl<'a> AdaptRequest<'a> {
    pub fn new(import_type: ImportType, data: &'a str) -> Self {
        Self {
            import_type,
            data,
            cursor: None,
            limit: None,
            search: None,
        }
    }
}

/// One page of a remote listing.
#[derive(Debug, Clone, Default)]
pub struct UrlPage {
    pub records: Vec<CanonicalRecord>,
    pub next_cursor: Option<String>,
}

pub struct ExternalAdaptor {
    fetcher: Arc<dyn HttpFetcher>,
    config: AdaptorConfig,
}

impl ExternalAdaptor {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: AdaptorConfig) -> Self {
        Self { fetcher, config }
    }

    pub async fn adapt(&self, req: &AdaptRequest<'_>) -> RegistryResult<Vec<CanonicalRecord>> {
        match req.import_type {
            ImportType::File => adapt_seed_file(req.data),
            ImportType::Json => adapt_json_text(req.data),
            ImportType::Url => self.adapt_registry_url(req).await,
        }
    }

    async fn adapt_registry_url(&self, req: &AdaptRequest<'_>) -> RegistryResult<Vec<CanonicalRecord>> {
        let base = req.data.trim();
        if base.is_empty() {
            return Err(RegistryError::invalid("URL is blank"));
        }
        if req.limit == Some(FETCH_ALL_LIMIT) {
            return self.fetch_all(base, req.search).await;
        }
        let page = self
            .fetch_url_page(base, req.cursor, req.limit, req.search)
            .await?;
        Ok(page.records)
    }

    /// Fetch and normalize a single page of a remote listing.
    pub async fn fetch_url_page(
        &self,
        base: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
        search: Option<&str>,
    ) -> RegistryResult<UrlPage> {
        let page_url = build_page_url(base.trim(), cursor, limit, search);
        debug!(url = %page_url, "Fetching registry page");

        let resp = self
            .fetcher
            .get(
                &page_url,
                &[("Accept", "application/json")],
                self.config.read_timeout(),
            )
            .await
            .map_err(|e| RegistryError::upstream(format!("{:#}", e)))?;
        if !resp.is_success() {
            return Err(RegistryError::upstream(format!(
                "HTTP {} when fetching {}",
                resp.status, page_url
            )));
        }

        let list: RegistryServerList = serde_json::from_str(&resp.body).map_err(|e| {
            RegistryError::upstream(format!(
                "Failed to parse response body from {}: {}",
                page_url, e
            ))
        })?;

        let records = list
            .servers
            .unwrap_or_default()
            .iter()
            .map(normalize_response)
            .collect::<RegistryResult<Vec<_>>>()
            .map_err(|e| {
                RegistryError::upstream(format!("Failed to adapt servers from {}: {}", page_url, e))
            })?;
        let next_cursor = list.metadata.and_then(|m| m.next_cursor);
        Ok(UrlPage {
            records,
            next_cursor,
        })
    }

    async fn fetch_all(&self, base: &str, search: Option<&str>) -> RegistryResult<Vec<CanonicalRecord>> {
        let page_size = self.config.fetch_all_page_size as i64;
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        while pages < self.config.max_pages {
            pages += 1;
            let page = self
                .fetch_url_page(base, cursor.as_deref(), Some(page_size), search)
                .await?;
            collected.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    cursor = None;
                    break;
                }
            }
        }

        if cursor.is_some() {
            warn!(
                url = base,
                pages, "Stopped following registry cursor at the page guard"
            );
        }
        info!(url = base, pages, servers = collected.len(), "Fetched registry listing");
        Ok(collected)
    }
}

/// Parse a seed file. One malformed element fails the whole batch.
fn adapt_seed_file(data: &str) -> RegistryResult<Vec<CanonicalRecord>> {
    let details: Vec<RegistryServerDetail> = serde_json::from_str(data)
        .map_err(|e| RegistryError::invalid(format!("Failed to parse server list: {}", e)))?;
    details.iter().map(normalize_detail).collect()
}

fn adapt_json_text(data: &str) -> RegistryResult<Vec<CanonicalRecord>> {
    let detail: RegistryServerDetail = serde_json::from_str(data)
        .map_err(|e| RegistryError::invalid(format!("Failed to parse server json: {}", e)))?;
    Ok(vec![normalize_detail(&detail)?])
}

/// Stable id for a server name: the same name always yields the same id.
pub fn derive_record_id(name: &str) -> String {
    Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Normalize one external server description.
pub fn normalize_detail(detail: &RegistryServerDetail) -> RegistryResult<CanonicalRecord> {
    let name = match detail.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return Err(RegistryError::invalid("Server name is required")),
    };

    let version_detail = detail
        .version
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| VersionDetail {
            version: v.to_string(),
            release_date: None,
            is_latest: None,
        });

    let protocol = resolve_protocol(detail);
    let remote_config = build_remote_config(detail.remotes.as_deref().unwrap_or_default())?;

    Ok(CanonicalRecord {
        id: derive_record_id(&name),
        name,
        description: detail.description.clone(),
        front_protocol: protocol.clone(),
        protocol,
        status: STATUS_ACTIVE.to_string(),
        version_detail,
        repository: detail.repository.clone(),
        remote_config,
        packages: detail.packages.clone().unwrap_or_default(),
        tool_spec: None,
    })
}

/// Normalize a listing item, merging its publication metadata.
pub fn normalize_response(response: &ServerResponse) -> RegistryResult<CanonicalRecord> {
    let mut record = normalize_detail(&response.server)?;
    let official = match response.meta.as_ref().and_then(|m| m.official.as_ref()) {
        Some(official) => official,
        None => return Ok(record),
    };

    if let Some(version) = record.version_detail.as_mut() {
        version.release_date = official.published_at.clone();
        version.is_latest = Some(official.is_latest.unwrap_or(true));
    }
    if let Some(status) = official.status.as_deref().filter(|s| !s.trim().is_empty()) {
        record.status = status.trim().to_string();
    }
    Ok(record)
}

/// Packages win over remotes; otherwise the first remote's transport decides.
fn resolve_protocol(detail: &RegistryServerDetail) -> Option<String> {
    if detail.packages.as_ref().is_some_and(|p| !p.is_empty()) {
        return Some(PROTOCOL_STDIO.to_string());
    }
    let first = detail.remotes.as_ref()?.first()?;
    let transport = first.transport_type.as_deref()?.trim().to_lowercase();
    match transport.as_str() {
        TRANSPORT_SSE => Some(PROTOCOL_SSE.to_string()),
        TRANSPORT_STREAMABLE => Some(PROTOCOL_STREAMABLE.to_string()),
        _ => None,
    }
}

fn build_remote_config(remotes: &[Remote]) -> RegistryResult<Option<RemoteConfig>> {
    if remotes.is_empty() {
        return Ok(None);
    }

    let mut export_path: Option<String> = None;
    let mut endpoints = Vec::with_capacity(remotes.len());
    for remote in remotes {
        let url = remote
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RegistryError::invalid("Remote url is required"))?;
        let parts = parse_url(url);
        let path = parts
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/".to_string());

        if export_path.is_none() {
            export_path = Some(path.clone());
        }

        let headers: BTreeMap<String, String> = remote
            .headers
            .iter()
            .flatten()
            .map(|h| (h.name.clone(), h.value.clone().unwrap_or_default()))
            .collect();

        endpoints.push(RemoteEndpoint {
            host_port: parts.host_port(),
            path,
            transport_type: remote.transport_type.clone(),
            protocol: parts.scheme.clone(),
            endpoint_type: FRONT_ENDPOINT_TYPE_TO_BACK.to_string(),
            headers,
        });
    }

    Ok(Some(RemoteConfig {
        export_path: export_path.unwrap_or_else(|| "/".to_string()),
        endpoints,
    }))
}

/// Append `cursor`, `limit` and `search` to `base`, skipping blank or
/// non-positive values.
pub fn build_page_url(
    base: &str,
    cursor: Option<&str>,
    limit: Option<i64>,
    search: Option<&str>,
) -> String {
    let mut url = base.to_string();
    let mut has_query = base.contains('?');
    let mut push = |url: &mut String, key: &str, value: &str| {
        url.push(if has_query { '&' } else { '?' });
        url.push_str(key);
        url.push('=');
        url.push_str(value);
        has_query = true;
    };

    if let Some(c) = cursor.filter(|c| !c.trim().is_empty()) {
        push(&mut url, "cursor", &uri_encode(c));
    }
    if let Some(l) = limit.filter(|l| *l > 0) {
        push(&mut url, "limit", &l.to_string());
    }
    if let Some(s) = search.filter(|s| !s.trim().is_empty()) {
        push(&mut url, "search", &uri_encode(s));
    }
    url
}

/// URI-encode a query value per RFC 3986.
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
