//! Export of stored servers in the external registry format.
//!
//! The reverse direction of [`adaptor`](crate::adaptor): canonical records
//! read back from the store are rendered as registry [`ServerResponse`]
//! values, so the index can answer the same list, detail and tools queries
//! it imports from.
//!
//! | Operation | Source |
//! |-----------|--------|
//! | [`list_servers`](RegistryExporter::list_servers) | cross-partition window over stored records |
//! | [`get_server`](RegistryExporter::get_server) | index name lookup, then a point read |
//! | [`get_server_versions`](RegistryExporter::get_server_versions) | as `get_server`, wrapped in a list |
//! | [`get_tools`](RegistryExporter::get_tools) | index id lookup, then the record's tool spec |

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoint::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use crate::error::RegistryResult;
use crate::index::{ServerIndex, StoreReader};
use crate::models::{CanonicalRecord, PROTOCOL_SSE, PROTOCOL_STREAMABLE, TRANSPORT_SSE, TRANSPORT_STREAMABLE};
use crate::pagination::{paginate_partitions, StoreDocumentPager};
use crate::wire::{
    HeaderInput, ListMetadata, OfficialMeta, RegistryServerDetail, RegistryServerList, Remote,
    ResponseMeta, ServerResponse,
};

/// Read side of the registry API over the backing store.
pub struct RegistryExporter {
    reader: StoreReader,
    index: Arc<dyn ServerIndex>,
}

impl RegistryExporter {
    pub fn new(reader: StoreReader, index: Arc<dyn ServerIndex>) -> Self {
        Self { reader, index }
    }

    /// Up to `limit` servers starting at global `offset`, in partition order.
    ///
    /// A blank `partition` pages across every partition. `name` is a blur
    /// filter. Stored documents that are not full records are skipped, so a
    /// window can come back shorter than `limit`.
    pub async fn list_servers(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> RegistryResult<RegistryServerList> {
        if limit == 0 {
            return Ok(server_list(Vec::new()));
        }
        let partitions = match partition.filter(|p| !p.is_empty()) {
            Some(p) => vec![p.to_string()],
            None => self.reader.partitions().await?,
        };

        let pager = StoreDocumentPager::new(self.reader.store(), name);
        let documents = paginate_partitions(&pager, &partitions, offset, limit).await?;
        let servers: Vec<ServerResponse> = documents
            .iter()
            .filter_map(
                |doc| match serde_json::from_str::<CanonicalRecord>(&doc.content) {
                    Ok(record) => Some(to_server_response(&record)),
                    Err(e) => {
                        warn!(
                            partition = %doc.partition,
                            data_id = %doc.data_id,
                            error = %e,
                            "Skipping unreadable server record"
                        );
                        None
                    }
                },
            )
            .collect();
        debug!(partitions = partitions.len(), servers = servers.len(), "Listed servers for export");
        Ok(server_list(servers))
    }

    /// One server by name. A blank `partition` resolves through every
    /// partition in order.
    pub async fn get_server(&self, partition: &str, name: &str) -> RegistryResult<Option<ServerResponse>> {
        Ok(self
            .load(partition, name)
            .await?
            .map(|record| to_server_response(&record)))
    }

    /// Published versions of a server. A stored record carries only its
    /// current version, so the list holds at most one entry.
    pub async fn get_server_versions(
        &self,
        partition: &str,
        name: &str,
    ) -> RegistryResult<Option<RegistryServerList>> {
        Ok(self
            .get_server(partition, name)
            .await?
            .map(|server| server_list(vec![server])))
    }

    /// Tool specification of the server with `id`, if it has one.
    pub async fn get_tools(&self, id: &str) -> RegistryResult<Option<Value>> {
        let entry = match self.index.get_by_id(id).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let record = self.reader.load_record(&entry.partition, &entry.id).await?;
        Ok(record.and_then(|r| r.tool_spec))
    }

    async fn load(&self, partition: &str, name: &str) -> RegistryResult<Option<CanonicalRecord>> {
        let entry = match self.index.get_by_name(partition, name).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let record = self.reader.load_record(&entry.partition, &entry.id).await?;
        if record.is_none() {
            debug!(partition = %entry.partition, id = %entry.id, "Indexed server has no stored record");
        }
        Ok(record)
    }
}

fn server_list(servers: Vec<ServerResponse>) -> RegistryServerList {
    RegistryServerList {
        metadata: Some(ListMetadata {
            next_cursor: None,
            count: Some(servers.len() as u64),
        }),
        servers: Some(servers),
    }
}

/// Render a canonical record as a registry listing item.
pub fn to_server_response(record: &CanonicalRecord) -> ServerResponse {
    let server = RegistryServerDetail {
        name: Some(record.name.clone()),
        description: record.description.clone(),
        title: None,
        repository: record.repository.clone(),
        version: record.version().map(str::to_string),
        website_url: None,
        packages: (!record.packages.is_empty()).then(|| record.packages.clone()),
        remotes: build_remotes(record),
    };

    let (published_at, is_latest) = match &record.version_detail {
        Some(v) => (v.release_date.clone(), v.is_latest),
        None => (None, None),
    };
    let official = OfficialMeta {
        updated_at: published_at.clone(),
        published_at,
        is_latest,
        status: Some(record.status.clone()),
    };

    ServerResponse {
        server,
        meta: Some(ResponseMeta {
            official: Some(official),
        }),
    }
}

/// Remotes exist only for servers served over SSE or streamable HTTP.
fn build_remotes(record: &CanonicalRecord) -> Option<Vec<Remote>> {
    let transport = match record.front_protocol.as_deref() {
        Some(PROTOCOL_SSE) => TRANSPORT_SSE,
        Some(PROTOCOL_STREAMABLE) => TRANSPORT_STREAMABLE,
        _ => return None,
    };
    let endpoints = &record.remote_config.as_ref()?.endpoints;
    if endpoints.is_empty() {
        return None;
    }

    let remotes = endpoints
        .iter()
        .map(|ep| {
            let headers: Vec<HeaderInput> = ep
                .headers
                .iter()
                .map(|(name, value)| HeaderInput {
                    name: name.clone(),
                    value: Some(value.clone()),
                })
                .collect();
            Remote {
                transport_type: Some(transport.to_string()),
                url: Some(build_url(
                    ep.protocol.as_deref().unwrap_or("http"),
                    &ep.host_port,
                    &ep.path,
                )),
                headers: (!headers.is_empty()).then_some(headers),
            }
        })
        .collect();
    Some(remotes)
}

/// `scheme://host[:port]path`, leaving out 80 for http and 443 for https.
pub fn build_url(scheme: &str, host_port: &str, path: &str) -> String {
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_port, None),
    };
    let port_is_default = port.and_then(|p| p.parse::<i64>().ok()).is_some_and(|p| {
        (scheme.eq_ignore_ascii_case("http") && p == DEFAULT_HTTP_PORT)
            || (scheme.eq_ignore_ascii_case("https") && p == DEFAULT_HTTPS_PORT)
    });

    let authority = if port_is_default { host } else { host_port };
    let path = if path.starts_with('/') || path.is_empty() {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("{}://{}{}", scheme, authority, path)
}
