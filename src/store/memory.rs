//! In-memory store for testing and the CLI.
//!
//! Implements [`BackingStore`], [`PartitionDirectory`] and [`RecordWriter`]
//! over a `BTreeMap` behind `std::sync::RwLock`, so the native order within a
//! partition is data-id order and stable across calls. Call counters and
//! per-partition fault injection let tests observe exactly how often the
//! store was consulted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{CanonicalRecord, EndpointSpec, PageResult};

use super::{
    server_data_id, server_name_tag, BackingStore, FindQuery, PartitionDirectory, QueryOutcome,
    RecordWriter, SearchMode, StoredDocument, SERVER_VERSIONS_GROUP,
};

type DocKey = (String, String);

/// In-memory partitioned store.
#[derive(Default)]
pub struct InMemoryRegistryStore {
    docs: RwLock<BTreeMap<DocKey, StoredDocument>>,
    partitions: RwLock<BTreeSet<String>>,
    failing_partitions: RwLock<BTreeSet<String>>,
    failing_names: RwLock<BTreeSet<String>>,
    find_calls: AtomicUsize,
    query_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a partition so it is listed even while empty.
    pub fn add_partition(&self, partition: &str) {
        self.partitions.write().unwrap().insert(partition.to_string());
    }

    /// Store a minimal server document.
    pub fn insert_server(&self, partition: &str, id: &str, name: &str) {
        let content = serde_json::json!({ "id": id, "name": name }).to_string();
        self.put(partition, id, name, content);
    }

    /// Store a full canonical record as a server document.
    pub fn put_record(&self, partition: &str, record: &CanonicalRecord) -> Result<()> {
        let content = serde_json::to_string(record)?;
        self.put(partition, &record.id, &record.name, content);
        Ok(())
    }

    /// Read back a stored record, if its content is a full canonical record.
    pub fn record(&self, partition: &str, id: &str) -> Option<CanonicalRecord> {
        let docs = self.docs.read().unwrap();
        docs.get(&(partition.to_string(), server_data_id(id)))
            .and_then(|d| serde_json::from_str(&d.content).ok())
    }

    pub fn server_count(&self, partition: &str) -> usize {
        self.docs
            .read()
            .unwrap()
            .keys()
            .filter(|(p, _)| p == partition)
            .count()
    }

    /// Make every `find_page` against `partition` fail.
    pub fn fail_partition(&self, partition: &str) {
        self.failing_partitions
            .write()
            .unwrap()
            .insert(partition.to_string());
    }

    /// Make writes of a record with this name fail.
    pub fn fail_writes_for(&self, name: &str) {
        self.failing_names.write().unwrap().insert(name.to_string());
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Total reads of either kind.
    pub fn read_calls(&self) -> usize {
        self.find_calls() + self.query_calls()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn put(&self, partition: &str, id: &str, name: &str, content: String) {
        self.add_partition(partition);
        let doc = StoredDocument {
            partition: partition.to_string(),
            data_id: server_data_id(id),
            group: SERVER_VERSIONS_GROUP.to_string(),
            tags: vec![server_name_tag(name)],
            content,
        };
        self.docs
            .write()
            .unwrap()
            .insert((partition.to_string(), doc.data_id.clone()), doc);
    }

    fn check_writable(&self, record: &CanonicalRecord) -> Result<()> {
        if self.failing_names.read().unwrap().contains(&record.name) {
            bail!("write rejected for server '{}'", record.name);
        }
        Ok(())
    }
}

/// Match `text` against a pattern where `*` matches any run of characters.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while ti < t.len() {
        if pi < p.len() && p[pi] != '*' && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn tag_matches(query: &FindQuery, tags: &[String]) -> bool {
    match query.search {
        SearchMode::Accurate => tags.iter().any(|t| *t == query.name_tag),
        SearchMode::Blur => tags.iter().any(|t| wildcard_match(&query.name_tag, t)),
    }
}

#[async_trait]
impl BackingStore for InMemoryRegistryStore {
    async fn find_page(&self, query: &FindQuery) -> Result<PageResult<StoredDocument>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_partitions
            .read()
            .unwrap()
            .contains(&query.partition)
        {
            bail!("partition '{}' is unavailable", query.partition);
        }

        let docs = self.docs.read().unwrap();
        let matching: Vec<&StoredDocument> = docs
            .values()
            .filter(|d| d.partition == query.partition && d.group == query.group)
            .filter(|d| match &query.data_id_pattern {
                Some(pattern) => wildcard_match(pattern, &d.data_id),
                None => true,
            })
            .filter(|d| tag_matches(query, &d.tags))
            .collect();

        let page_no = query.page_no.max(1);
        let items = matching
            .iter()
            .skip((page_no - 1).saturating_mul(query.page_size))
            .take(query.page_size)
            .map(|d| (*d).clone())
            .collect();
        Ok(PageResult::new(
            items,
            matching.len(),
            page_no,
            query.page_size,
        ))
    }

    async fn query_one(&self, partition: &str, data_id: &str, group: &str) -> Result<QueryOutcome> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.read().unwrap();
        Ok(
            match docs.get(&(partition.to_string(), data_id.to_string())) {
                Some(d) if d.group == group => QueryOutcome::Found(d.content.clone()),
                _ => QueryOutcome::NotFound,
            },
        )
    }
}

#[async_trait]
impl PartitionDirectory for InMemoryRegistryStore {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.partitions.read().unwrap().iter().cloned().collect())
    }
}

#[async_trait]
impl RecordWriter for InMemoryRegistryStore {
    async fn create(
        &self,
        partition: &str,
        record: &CanonicalRecord,
        _endpoint: Option<&EndpointSpec>,
    ) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable(record)?;
        let key = (partition.to_string(), server_data_id(&record.id));
        if self.docs.read().unwrap().contains_key(&key) {
            bail!("server '{}' already exists in '{}'", record.name, partition);
        }
        self.put_record(partition, record)
    }

    async fn update(
        &self,
        partition: &str,
        record: &CanonicalRecord,
        _endpoint: Option<&EndpointSpec>,
    ) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable(record)?;
        let key = (partition.to_string(), server_data_id(&record.id));
        if !self.docs.read().unwrap().contains_key(&key) {
            bail!("server '{}' does not exist in '{}'", record.name, partition);
        }
        self.put_record(partition, record)
    }
}
