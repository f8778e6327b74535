//! Server location index.
//!
//! Resolves a server id or `(partition, name)` pair to an [`IndexEntry`].
//! Two implementations share one store-reading core ([`StoreReader`]):
//!
//! - [`PlainServerIndex`] always reads the backing store.
//! - [`CachedServerIndex`] is cache-aside: lookups consult a [`CacheIndex`]
//!   first, fall back to the store on a miss and write the result through.
//!   A background task re-reads every partition on a fixed interval.
//!
//! The store stays the source of truth. The cache only ever shortens the
//! path to an answer the store would have given.
//!
//! Every store call made through [`StoreReader`] is bounded by
//! `index.store_timeout_secs`. A call that overruns fails as
//! [`RegistryError::Store`](crate::error::RegistryError::Store), and a
//! resync round logs it and moves on to the next partition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheIndex, CacheStats};
use crate::config::IndexConfig;
use crate::error::RegistryResult;
use crate::models::{CanonicalRecord, IndexEntry, PageResult};
use crate::pagination::{paginate_counted, partition_totals, StoreNamePager};
use crate::store::{
    index_entry_from_document, ordered_partitions, server_data_id, server_name_from_content,
    BackingStore, FindQuery, PartitionDirectory, QueryOutcome, SearchMode, TimeBounded,
    SERVER_VERSIONS_GROUP,
};

/// Lookup surface shared by the plain and cached indexes.
#[async_trait]
pub trait ServerIndex: Send + Sync {
    async fn get_by_id(&self, id: &str) -> RegistryResult<Option<IndexEntry>>;

    /// Look a server up by name. A blank `partition` checks every partition
    /// in ascending order and returns the first match.
    async fn get_by_name(&self, partition: &str, name: &str) -> RegistryResult<Option<IndexEntry>>;

    /// One page of servers. `partition = None` pages across all partitions.
    async fn search(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
        mode: SearchMode,
        page_no: usize,
        page_size: usize,
    ) -> RegistryResult<PageResult<IndexEntry>>;

    fn remove_by_name(&self, partition: &str, name: &str);

    fn remove_by_id(&self, id: &str);
}

/// Store-backed lookups with no caching. Each store call gives up after
/// `timeout`.
#[derive(Clone)]
pub struct StoreReader {
    store: Arc<dyn BackingStore>,
    directory: Arc<dyn PartitionDirectory>,
}

impl StoreReader {
    pub fn new(
        store: Arc<dyn BackingStore>,
        directory: Arc<dyn PartitionDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            store: Arc::new(TimeBounded::new(store, timeout)),
            directory: Arc::new(TimeBounded::new(directory, timeout)),
        }
    }

    /// The time-bounded store, for pagers that read through this reader.
    pub fn store(&self) -> &dyn BackingStore {
        self.store.as_ref()
    }

    pub async fn partitions(&self) -> anyhow::Result<Vec<String>> {
        ordered_partitions(self.directory.as_ref()).await
    }

    /// Point-read the server document in each partition until one is found.
    pub async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<IndexEntry>> {
        let data_id = server_data_id(id);
        for partition in self.partitions().await? {
            if let QueryOutcome::Found(content) = self
                .store
                .query_one(&partition, &data_id, SERVER_VERSIONS_GROUP)
                .await?
            {
                let name = server_name_from_content(&content)?;
                debug!(id, partition = %partition, "Found server by id");
                return Ok(Some(IndexEntry::new(partition, name, id)));
            }
        }
        debug!(id, "Server not found by id");
        Ok(None)
    }

    /// Full record stored under `id` in `partition`.
    pub async fn load_record(&self, partition: &str, id: &str) -> anyhow::Result<Option<CanonicalRecord>> {
        match self
            .store
            .query_one(partition, &server_data_id(id), SERVER_VERSIONS_GROUP)
            .await?
        {
            QueryOutcome::Found(content) => {
                let record = serde_json::from_str(&content).with_context(|| {
                    format!("Malformed server record '{}' in partition '{}'", id, partition)
                })?;
                Ok(Some(record))
            }
            QueryOutcome::NotFound => Ok(None),
        }
    }

    /// Accurate name match inside one partition.
    pub async fn find_by_name(&self, partition: &str, name: &str) -> anyhow::Result<Option<IndexEntry>> {
        let query = FindQuery::servers(partition, Some(name), SearchMode::Accurate, 1, 1);
        let page = self.store.find_page(&query).await?;
        page.items
            .first()
            .map(index_entry_from_document)
            .transpose()
    }

    pub async fn search(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
        mode: SearchMode,
        page_no: usize,
        page_size: usize,
    ) -> anyhow::Result<PageResult<IndexEntry>> {
        let page_no = page_no.max(1);
        if page_size == 0 {
            return Ok(PageResult::new(Vec::new(), 0, page_no, 0));
        }
        if let Some(partition) = partition.filter(|p| !p.is_empty()) {
            let query = FindQuery::servers(partition, name, mode, page_no, page_size);
            let page = self.store.find_page(&query).await?;
            let entries = page
                .items
                .iter()
                .map(index_entry_from_document)
                .collect::<anyhow::Result<Vec<_>>>()?;
            return Ok(PageResult::new(entries, page.total_count, page_no, page_size));
        }

        let partitions = self.partitions().await?;
        let pager = StoreNamePager::new(self.store.as_ref(), name).with_search(mode);
        let totals = partition_totals(&pager, &partitions).await?;
        let total = totals.iter().map(|(_, count)| count).sum();
        let items = match (page_no - 1).checked_mul(page_size) {
            Some(offset) => paginate_counted(&pager, &totals, offset, page_size).await?,
            None => Vec::new(),
        };
        Ok(PageResult::new(items, total, page_no, page_size))
    }

    /// First page of every server in `partition`, used by resync.
    async fn list_partition(&self, partition: &str, page_size: usize) -> anyhow::Result<Vec<IndexEntry>> {
        let query = FindQuery::servers(partition, None, SearchMode::Blur, 1, page_size);
        let page = self.store.find_page(&query).await?;
        page.items.iter().map(index_entry_from_document).collect()
    }
}

/// Index that always asks the backing store.
pub struct PlainServerIndex {
    reader: StoreReader,
}

impl PlainServerIndex {
    pub fn new(store: Arc<dyn BackingStore>, directory: Arc<dyn PartitionDirectory>) -> Self {
        Self::with_store_timeout(store, directory, IndexConfig::default().store_timeout())
    }

    pub fn with_store_timeout(
        store: Arc<dyn BackingStore>,
        directory: Arc<dyn PartitionDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            reader: StoreReader::new(store, directory, timeout),
        }
    }
}

#[async_trait]
impl ServerIndex for PlainServerIndex {
    async fn get_by_id(&self, id: &str) -> RegistryResult<Option<IndexEntry>> {
        Ok(self.reader.find_by_id(id).await?)
    }

    async fn get_by_name(&self, partition: &str, name: &str) -> RegistryResult<Option<IndexEntry>> {
        if name.is_empty() {
            return Ok(None);
        }
        if !partition.is_empty() {
            return Ok(self.reader.find_by_name(partition, name).await?);
        }
        for partition in self.reader.partitions().await? {
            if partition.is_empty() {
                continue;
            }
            if let Some(entry) = self.reader.find_by_name(&partition, name).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn search(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
        mode: SearchMode,
        page_no: usize,
        page_size: usize,
    ) -> RegistryResult<PageResult<IndexEntry>> {
        Ok(self
            .reader
            .search(partition, name, mode, page_no, page_size)
            .await?)
    }

    fn remove_by_name(&self, _partition: &str, _name: &str) {}

    fn remove_by_id(&self, _id: &str) {}
}

/// Cache-aside index with a periodic background resync.
///
/// Construct inside a tokio runtime when the cache is enabled: the resync
/// task is spawned on the current runtime. Call [`shutdown`](Self::shutdown)
/// to stop it; dropping the index also cancels it.
pub struct CachedServerIndex {
    reader: StoreReader,
    cache: Arc<CacheIndex>,
    enabled: bool,
    resync_page_size: usize,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CachedServerIndex {
    pub fn new(
        store: Arc<dyn BackingStore>,
        directory: Arc<dyn PartitionDirectory>,
        config: &IndexConfig,
    ) -> Self {
        let reader = StoreReader::new(store, directory, config.store_timeout());
        let cache = Arc::new(CacheIndex::new(config.max_entries));
        let cancel = CancellationToken::new();

        let task = if config.cache_enabled {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let period = config.sync_interval();
                    let fut = run_resync(
                        reader.clone(),
                        cache.clone(),
                        period,
                        config.resync_page_size,
                        cancel.clone(),
                    );
                    info!(interval_secs = period.as_secs(), "Cache resync task started");
                    Some(handle.spawn(fut))
                }
                Err(_) => {
                    warn!("No tokio runtime available; periodic cache resync disabled");
                    None
                }
            }
        } else {
            None
        };

        info!(
            cache_enabled = config.cache_enabled,
            sync_interval_secs = config.sync_interval_secs,
            "Server index initialized"
        );
        Self {
            reader,
            cache,
            enabled: config.cache_enabled,
            resync_page_size: config.resync_page_size,
            cancel,
            task: Mutex::new(task),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Explicit upsert into the cache. No-op when caching is disabled.
    pub fn update_index(&self, partition: &str, name: &str, id: &str) {
        if self.enabled {
            self.cache.update_index(partition, name, id);
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        let stats = self.cache.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            size = stats.size,
            hit_rate = stats.hit_rate(),
            "Cache stats"
        );
        stats
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Cache cleared");
    }

    /// Run one resync pass now, outside the schedule.
    pub async fn trigger_resync(&self) {
        if !self.enabled {
            warn!("Cache is disabled, manual resync ignored");
            return;
        }
        info!("Manual cache resync triggered");
        resync_once(&self.reader, &self.cache, self.resync_page_size).await;
    }

    /// Stop the resync task and wait for it. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Cache resync task ended abnormally");
                }
            }
            info!("Cache resync task stopped");
        }
    }

    async fn cached_name_lookup(&self, partition: &str, name: &str) -> RegistryResult<Option<IndexEntry>> {
        if !self.enabled {
            return Ok(self.reader.find_by_name(partition, name).await?);
        }
        if let Some(entry) = self.cache.get_by_name(partition, name) {
            debug!(partition, name, "Cache hit for name");
            return Ok(Some(entry));
        }
        debug!(partition, name, "Cache miss for name, querying store");
        let found = self.reader.find_by_name(partition, name).await?;
        if let Some(entry) = &found {
            self.cache.update_index(partition, name, &entry.id);
        }
        Ok(found)
    }
}

impl Drop for CachedServerIndex {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl ServerIndex for CachedServerIndex {
    async fn get_by_id(&self, id: &str) -> RegistryResult<Option<IndexEntry>> {
        if !self.enabled {
            return Ok(self.reader.find_by_id(id).await?);
        }
        if let Some(entry) = self.cache.get_by_id(id) {
            debug!(id, "Cache hit for id");
            return Ok(Some(entry));
        }
        debug!(id, "Cache miss for id, querying store");
        let found = self.reader.find_by_id(id).await?;
        if let Some(entry) = &found {
            self.cache.update_index(&entry.partition, &entry.name, &entry.id);
        }
        Ok(found)
    }

    async fn get_by_name(&self, partition: &str, name: &str) -> RegistryResult<Option<IndexEntry>> {
        if name.is_empty() {
            if partition.is_empty() {
                warn!("get_by_name called without partition or name");
            }
            return Ok(None);
        }
        if !partition.is_empty() {
            return self.cached_name_lookup(partition, name).await;
        }
        for partition in self.reader.partitions().await? {
            if partition.is_empty() {
                continue;
            }
            if let Some(entry) = self.cached_name_lookup(&partition, name).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn search(
        &self,
        partition: Option<&str>,
        name: Option<&str>,
        mode: SearchMode,
        page_no: usize,
        page_size: usize,
    ) -> RegistryResult<PageResult<IndexEntry>> {
        let page = self
            .reader
            .search(partition, name, mode, page_no, page_size)
            .await?;
        if self.enabled {
            for entry in &page.items {
                self.cache.update_index(&entry.partition, &entry.name, &entry.id);
            }
            debug!(entries = page.items.len(), "Updated cache from search results");
        }
        Ok(page)
    }

    fn remove_by_name(&self, partition: &str, name: &str) {
        if self.enabled {
            debug!(partition, name, "Removing cache entry by name");
            self.cache.remove_by_name(partition, name);
        }
    }

    fn remove_by_id(&self, id: &str) {
        if self.enabled {
            debug!(id, "Removing cache entry by id");
            self.cache.remove_by_id(id);
        }
    }
}

async fn run_resync(
    reader: StoreReader,
    cache: Arc<CacheIndex>,
    period: Duration,
    page_size: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = resync_once(&reader, &cache, page_size) => {}
                }
            }
        }
    }
    debug!("Cache resync loop exited");
}

/// Re-read every partition into the cache. A failing partition is logged
/// and skipped.
async fn resync_once(reader: &StoreReader, cache: &CacheIndex, page_size: usize) {
    debug!("Starting cache resync");
    let partitions = match reader.partitions().await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Failed to list partitions for cache resync");
            return;
        }
    };

    let mut synced = 0usize;
    for partition in &partitions {
        match reader.list_partition(partition, page_size).await {
            Ok(entries) => {
                synced += entries.len();
                for entry in entries {
                    cache.update_index(&entry.partition, &entry.name, &entry.id);
                }
            }
            Err(e) => {
                error!(partition = %partition, error = %e, "Error syncing cache for partition");
            }
        }
    }
    cache.mark_resynced(Utc::now());
    debug!(partitions = partitions.len(), entries = synced, "Cache resync completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryRegistryStore;

    fn seeded() -> Arc<InMemoryRegistryStore> {
        let store = Arc::new(InMemoryRegistryStore::new());
        store.insert_server("beta", "id-b", "weather");
        store.insert_server("alpha", "id-a", "weather");
        store.insert_server("alpha", "id-c", "calendar");
        store
    }

    fn cached(store: &Arc<InMemoryRegistryStore>, enabled: bool) -> CachedServerIndex {
        let config = IndexConfig {
            cache_enabled: enabled,
            sync_interval_secs: 3600,
            ..IndexConfig::default()
        };
        CachedServerIndex::new(store.clone(), store.clone(), &config)
    }

    #[tokio::test]
    async fn test_blank_partition_prefers_first_sorted() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let entry = index.get_by_name("", "weather").await.unwrap().unwrap();
        assert_eq!(entry, IndexEntry::new("alpha", "weather", "id-a"));
        assert!(index.get_by_name("", "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_searches_partitions() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let entry = index.get_by_id("id-b").await.unwrap().unwrap();
        assert_eq!(entry.partition, "beta");
        assert_eq!(entry.name, "weather");
        assert!(index.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hit_skips_store() {
        let store = seeded();
        let index = cached(&store, true);
        index.update_index("alpha", "weather", "id-a");
        let before = store.read_calls();
        let entry = index.get_by_name("alpha", "weather").await.unwrap().unwrap();
        assert_eq!(entry.id, "id-a");
        assert_eq!(store.read_calls(), before);
        assert_eq!(index.cache_stats().hits, 1);
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_miss_writes_through() {
        let store = seeded();
        let index = cached(&store, true);
        let first = index.get_by_id("id-c").await.unwrap();
        let reads = store.read_calls();
        let second = index.get_by_id("id-c").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.read_calls(), reads);
        let stats = index.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        // The id miss also populated the name key.
        assert!(index.get_by_name("alpha", "calendar").await.unwrap().is_some());
        assert_eq!(store.read_calls(), reads);
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_removal_forces_store_read() {
        let store = seeded();
        let index = cached(&store, true);
        index.get_by_name("alpha", "weather").await.unwrap();
        index.remove_by_name("alpha", "weather");
        index.remove_by_name("alpha", "weather");
        let reads = store.read_calls();
        index.get_by_name("alpha", "weather").await.unwrap();
        assert!(store.read_calls() > reads);
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_never_touches_stats() {
        let store = seeded();
        let index = cached(&store, false);
        let plain = PlainServerIndex::new(store.clone(), store.clone());
        for (p, n) in [("alpha", "weather"), ("beta", "weather"), ("", "calendar"), ("alpha", "nope")] {
            assert_eq!(
                index.get_by_name(p, n).await.unwrap(),
                plain.get_by_name(p, n).await.unwrap()
            );
        }
        assert_eq!(
            index.get_by_id("id-b").await.unwrap(),
            plain.get_by_id("id-b").await.unwrap()
        );
        index.update_index("alpha", "x", "y");
        index.trigger_resync().await;
        let stats = index.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
        assert!(stats.last_resync_at.is_none());
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_across_partitions() {
        let store = seeded();
        let index = cached(&store, true);
        let page = index
            .search(None, None, SearchMode::Blur, 1, 2)
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.pages_available, 2);
        let ids: Vec<&str> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["id-a", "id-c"]);

        let page = index
            .search(None, None, SearchMode::Blur, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.items, vec![IndexEntry::new("beta", "weather", "id-b")]);

        // Each result was cached under its own name.
        let reads = store.read_calls();
        index.get_by_name("alpha", "calendar").await.unwrap();
        index.get_by_name("beta", "weather").await.unwrap();
        assert_eq!(store.read_calls(), reads);
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_counts_each_partition_once() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let before = store.read_calls();
        let page = index
            .search(None, None, SearchMode::Blur, 1, 2)
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 2);
        // Two counts, then one data page from alpha.
        assert_eq!(store.read_calls() - before, 3);
    }

    #[tokio::test]
    async fn test_search_zero_page_size_reads_nothing() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let before = store.read_calls();
        for partition in [None, Some("alpha")] {
            let page = index
                .search(partition, None, SearchMode::Blur, 1, 0)
                .await
                .unwrap();
            assert!(page.items.is_empty());
            assert_eq!(page.pages_available, 0);
        }
        assert_eq!(store.read_calls(), before);
    }

    #[tokio::test]
    async fn test_search_huge_page_number_is_empty() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let page = index
            .search(None, None, SearchMode::Blur, usize::MAX, 10)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 3);
        let page = index
            .search(Some("alpha"), None, SearchMode::Blur, usize::MAX, 10)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_search_single_partition_blur() {
        let store = seeded();
        let index = PlainServerIndex::new(store.clone(), store.clone());
        let page = index
            .search(Some("alpha"), Some("eath"), SearchMode::Blur, 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].id, "id-a");
    }

    #[tokio::test]
    async fn test_manual_resync_survives_failing_partition() {
        let store = seeded();
        store.fail_partition("alpha");
        let index = cached(&store, true);
        index.trigger_resync().await;
        let stats = index.cache_stats();
        assert_eq!(stats.size, 1);
        assert!(stats.last_resync_at.is_some());
        index.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_fine() {
        let store = seeded();
        let index = cached(&store, true);
        index.shutdown().await;
        index.shutdown().await;
    }

    #[test]
    fn test_outside_runtime_disables_resync() {
        let store = seeded();
        let index = cached(&store, true);
        assert!(index.is_enabled());
        assert!(index.task.lock().unwrap().is_none());
    }
}
