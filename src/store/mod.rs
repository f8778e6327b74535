//! Collaborator interfaces for the partitioned backing store.
//!
//! The index, pagination engine and import pipeline never talk to a
//! concrete database. They consume the traits below, which enables
//! pluggable backends (the production config store, the in-memory store
//! used by tests and the CLI).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Storage conventions
//!
//! | Item | Value |
//! |------|-------|
//! | group | [`SERVER_VERSIONS_GROUP`] |
//! | data id | `<id>` + [`SERVER_DATA_ID_SUFFIX`] |
//! | name tag | [`NAME_TAG_PREFIX`] + `<name>` |
//! | content | JSON object with at least `id` and `name` |

pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{CanonicalRecord, EndpointSpec, IndexEntry, PageResult};

pub const SERVER_VERSIONS_GROUP: &str = "mcp-server-versions";
pub const SERVER_DATA_ID_SUFFIX: &str = "-mcp-versions.json";
pub const NAME_TAG_PREFIX: &str = "server-name=";
pub const ALL_PATTERN: &str = "*";

/// How a name filter is matched against stored name tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// The tag must equal `server-name=<name>`.
    Accurate,
    /// The tag must match `server-name=*<name>*`.
    Blur,
}

/// A raw document as held by the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub partition: String,
    pub data_id: String,
    pub group: String,
    pub tags: Vec<String>,
    pub content: String,
}

/// Parameters for [`BackingStore::find_page`].
#[derive(Debug, Clone)]
pub struct FindQuery {
    pub search: SearchMode,
    /// 1-based page number.
    pub page_no: usize,
    pub page_size: usize,
    /// `None` matches every data id; `*` acts as a wildcard.
    pub data_id_pattern: Option<String>,
    pub group: String,
    pub partition: String,
    /// Tag filter; wildcards are honoured in [`SearchMode::Blur`].
    pub name_tag: String,
}

impl FindQuery {
    /// Build the server listing query used by every index lookup.
    ///
    /// A blank name always degrades to a blur search over every server.
    pub fn servers(
        partition: &str,
        name: Option<&str>,
        search: SearchMode,
        page_no: usize,
        page_size: usize,
    ) -> Self {
        let name = name.unwrap_or("");
        let (search, name_tag, data_id_pattern) = if search == SearchMode::Blur || name.is_empty()
        {
            (
                SearchMode::Blur,
                format!("{NAME_TAG_PREFIX}{ALL_PATTERN}{name}{ALL_PATTERN}"),
                Some(ALL_PATTERN.to_string()),
            )
        } else {
            (SearchMode::Accurate, format!("{NAME_TAG_PREFIX}{name}"), None)
        };
        Self {
            search,
            page_no,
            page_size,
            data_id_pattern,
            group: SERVER_VERSIONS_GROUP.to_string(),
            partition: partition.to_string(),
            name_tag,
        }
    }
}

/// Result of a point read.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Found(String),
    NotFound,
}

/// Abstract paginated document store, one partition per namespace.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_page`](BackingStore::find_page) | One page of documents matching a filter in one partition |
/// | [`query_one`](BackingStore::query_one) | Point read of a single document |
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn find_page(&self, query: &FindQuery) -> Result<PageResult<StoredDocument>>;

    async fn query_one(&self, partition: &str, data_id: &str, group: &str) -> Result<QueryOutcome>;
}

/// Enumerates partitions. Order is unspecified; callers sort.
#[async_trait]
pub trait PartitionDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;
}

/// Write side used by the import pipeline.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn create(
        &self,
        partition: &str,
        record: &CanonicalRecord,
        endpoint: Option<&EndpointSpec>,
    ) -> Result<()>;

    async fn update(
        &self,
        partition: &str,
        record: &CanonicalRecord,
        endpoint: Option<&EndpointSpec>,
    ) -> Result<()>;
}

/// Deadline wrapper for a store collaborator.
///
/// Every call through the wrapper fails with an error once `limit` has
/// elapsed, so a hung partition cannot stall a lookup or a resync round.
pub struct TimeBounded<T: ?Sized> {
    inner: Arc<T>,
    limit: Duration,
}

impl<T: ?Sized> TimeBounded<T> {
    pub fn new(inner: Arc<T>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

async fn within<T>(limit: Duration, what: String, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => bail!("{} timed out after {}ms", what, limit.as_millis()),
    }
}

#[async_trait]
impl BackingStore for TimeBounded<dyn BackingStore> {
    async fn find_page(&self, query: &FindQuery) -> Result<PageResult<StoredDocument>> {
        let what = format!("find_page in partition '{}'", query.partition);
        within(self.limit, what, self.inner.find_page(query)).await
    }

    async fn query_one(&self, partition: &str, data_id: &str, group: &str) -> Result<QueryOutcome> {
        let what = format!("query_one of '{}' in partition '{}'", data_id, partition);
        within(self.limit, what, self.inner.query_one(partition, data_id, group)).await
    }
}

#[async_trait]
impl PartitionDirectory for TimeBounded<dyn PartitionDirectory> {
    async fn list(&self) -> Result<Vec<String>> {
        within(self.limit, "listing partitions".to_string(), self.inner.list()).await
    }
}

/// Sorted, de-duplicated partition list.
pub async fn ordered_partitions(directory: &dyn PartitionDirectory) -> Result<Vec<String>> {
    let mut partitions = directory.list().await?;
    partitions.sort();
    partitions.dedup();
    Ok(partitions)
}

pub fn server_data_id(id: &str) -> String {
    format!("{id}{SERVER_DATA_ID_SUFFIX}")
}

pub fn server_name_tag(name: &str) -> String {
    format!("{NAME_TAG_PREFIX}{name}")
}

#[derive(Deserialize)]
struct ServerHead {
    id: String,
    name: String,
}

/// Read the `(partition, name, id)` triple out of a stored server document.
pub fn index_entry_from_document(doc: &StoredDocument) -> Result<IndexEntry> {
    let head: ServerHead = serde_json::from_str(&doc.content)
        .with_context(|| format!("Malformed server document '{}'", doc.data_id))?;
    Ok(IndexEntry::new(doc.partition.clone(), head.name, head.id))
}

/// Name of a server from its stored content.
pub fn server_name_from_content(content: &str) -> Result<String> {
    let head: ServerHead =
        serde_json::from_str(content).context("Malformed server document content")?;
    Ok(head.name)
}
