//! Cache-aside index behavior over the in-memory store: background
//! resync under paused time, store timeouts, concurrent mutation and
//! cross-partition paging.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use registry_index::config::IndexConfig;
use registry_index::error::RegistryError;
use registry_index::index::{CachedServerIndex, PlainServerIndex, ServerIndex};
use registry_index::models::{IndexEntry, PageResult};
use registry_index::pagination::{paginate_partitions, StoreNamePager};
use registry_index::store::memory::InMemoryRegistryStore;
use registry_index::store::{
    BackingStore, FindQuery, PartitionDirectory, QueryOutcome, SearchMode, StoredDocument,
};

/// Delegates to the in-memory store, except that calls against one
/// partition never complete.
struct StalledStore {
    inner: Arc<InMemoryRegistryStore>,
    stalled: &'static str,
}

#[async_trait]
impl BackingStore for StalledStore {
    async fn find_page(&self, query: &FindQuery) -> Result<PageResult<StoredDocument>> {
        if query.partition == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.find_page(query).await
    }

    async fn query_one(&self, partition: &str, data_id: &str, group: &str) -> Result<QueryOutcome> {
        if partition == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.query_one(partition, data_id, group).await
    }
}

#[async_trait]
impl PartitionDirectory for StalledStore {
    async fn list(&self) -> Result<Vec<String>> {
        self.inner.list().await
    }
}

/// "ns-a" holds ten servers, "ns-b" two.
fn two_partitions() -> Arc<InMemoryRegistryStore> {
    let store = Arc::new(InMemoryRegistryStore::new());
    for i in 0..10 {
        store.insert_server("ns-a", &format!("a-{i:02}"), &format!("alpha-{i:02}"));
    }
    for i in 0..2 {
        store.insert_server("ns-b", &format!("b-{i:02}"), &format!("beta-{i:02}"));
    }
    store
}

fn config(interval_secs: u64) -> IndexConfig {
    IndexConfig {
        sync_interval_secs: interval_secs,
        ..IndexConfig::default()
    }
}

fn ids(entries: &[IndexEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_periodic_resync_fills_cache() {
    let store = two_partitions();
    let index = CachedServerIndex::new(store.clone(), store.clone(), &config(60));
    assert_eq!(index.cache_stats().size, 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let stats = index.cache_stats();
    assert_eq!(stats.size, 12);
    assert!(stats.last_resync_at.is_some());

    // Served from the cache without a store read.
    let reads = store.read_calls();
    let entry = index.get_by_name("ns-b", "beta-01").await.unwrap();
    assert_eq!(entry, Some(IndexEntry::new("ns-b", "beta-01", "b-01")));
    assert_eq!(store.read_calls(), reads);

    store.insert_server("ns-b", "b-02", "beta-02");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(index.cache_stats().size, 13);

    index.shutdown().await;
    store.insert_server("ns-b", "b-03", "beta-03");
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(index.cache_stats().size, 13);
}

#[tokio::test(start_paused = true)]
async fn test_resync_skips_failing_partition() {
    let store = two_partitions();
    store.fail_partition("ns-a");
    let index = CachedServerIndex::new(store.clone(), store.clone(), &config(30));

    tokio::time::sleep(Duration::from_secs(31)).await;
    let stats = index.cache_stats();
    assert_eq!(stats.size, 2);
    assert!(stats.last_resync_at.is_some());
    index.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_partition_times_out() {
    let store = Arc::new(StalledStore {
        inner: two_partitions(),
        stalled: "ns-a",
    });
    let index = CachedServerIndex::new(
        store.clone(),
        store.clone(),
        &IndexConfig {
            store_timeout_secs: 5,
            ..config(3600)
        },
    );

    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(60), index.trigger_resync())
        .await
        .expect("resync should finish despite the stalled partition");
    assert!(started.elapsed() >= Duration::from_secs(5));
    let stats = index.cache_stats();
    assert_eq!(stats.size, 2);
    assert!(stats.last_resync_at.is_some());

    let err = index.get_by_name("ns-a", "alpha-03").await.unwrap_err();
    assert!(matches!(err, RegistryError::Store(_)));
    assert!(err.to_string().contains("timed out"));

    assert!(index.get_by_name("ns-b", "beta-00").await.unwrap().is_some());
    index.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_keep_lookups_consistent() {
    let store = Arc::new(InMemoryRegistryStore::new());
    store.add_partition("p");
    let index = Arc::new(CachedServerIndex::new(
        store.clone(),
        store.clone(),
        &IndexConfig {
            max_entries: 8,
            ..config(3600)
        },
    ));

    let mut tasks = Vec::new();
    for worker in 0..8usize {
        let index = index.clone();
        tasks.push(tokio::spawn(async move {
            for step in 0..500usize {
                let k = (worker * 7 + step) % 16;
                let name = format!("srv-{k:02}");
                let id = format!("id-{k:02}");
                match (worker + step) % 4 {
                    0 | 1 => index.update_index("p", &name, &id),
                    2 => index.remove_by_name("p", &name),
                    _ => index.remove_by_id(&id),
                }
                if step % 5 == 0 {
                    index.get_by_name("p", &name).await.unwrap();
                }
                if step % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let size = index.cache_stats().size;
    assert!(size <= 8, "cache grew to {size}");
    let mut resolved = 0u64;
    for k in 0..16 {
        let name = format!("srv-{k:02}");
        let id = format!("id-{k:02}");
        // The store holds nothing, so any answer comes from the cache.
        let by_name = index.get_by_name("p", &name).await.unwrap();
        let by_id = index.get_by_id(&id).await.unwrap();
        assert_eq!(by_name, by_id, "{name} and {id} disagree");
        if let Some(entry) = by_name {
            assert_eq!(entry.id, id);
            resolved += 1;
        }
    }
    assert_eq!(resolved, size);
    index.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_index_never_resyncs() {
    let store = two_partitions();
    let index = CachedServerIndex::new(
        store.clone(),
        store.clone(),
        &IndexConfig {
            cache_enabled: false,
            ..config(10)
        },
    );
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(store.read_calls(), 0);
    assert!(index.get_by_id("a-03").await.unwrap().is_some());
    let stats = index.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.size), (0, 0, 0));
    index.shutdown().await;
}

#[tokio::test]
async fn test_update_index_answers_until_removed() {
    let store = two_partitions();
    let index = CachedServerIndex::new(store.clone(), store.clone(), &config(3600));

    for (partition, name, id) in [("ns-a", "alpha-00", "a-00"), ("ns-x", "ghost", "g-1")] {
        index.update_index(partition, name, id);
        let reads = store.read_calls();
        let entry = index.get_by_name(partition, name).await.unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(store.read_calls(), reads);
    }

    // "ghost" only ever existed in the cache.
    index.remove_by_id("g-1");
    assert!(index.get_by_name("ns-x", "ghost").await.unwrap().is_none());
    index.shutdown().await;
}

#[tokio::test]
async fn test_cross_partition_windows() {
    let store = two_partitions();
    let partitions = vec!["ns-a".to_string(), "ns-b".to_string()];
    let pager = StoreNamePager::new(store.as_ref(), None);

    let all = paginate_partitions(&pager, &partitions, 0, 100).await.unwrap();
    assert_eq!(all.len(), 12);
    assert!(all[..10].iter().all(|e| e.partition == "ns-a"));
    assert!(all[10..].iter().all(|e| e.partition == "ns-b"));

    let window = paginate_partitions(&pager, &partitions, 5, 4).await.unwrap();
    assert_eq!(ids(&window), vec!["a-05", "a-06", "a-07", "a-08"]);

    let tail = paginate_partitions(&pager, &partitions, 10, 10).await.unwrap();
    assert_eq!(ids(&tail), vec!["b-00", "b-01"]);
}

#[tokio::test]
async fn test_zero_limit_reads_nothing() {
    let store = two_partitions();
    let partitions = vec!["ns-a".to_string(), "ns-b".to_string()];
    let pager = StoreNamePager::new(store.as_ref(), None);
    let items = paginate_partitions(&pager, &partitions, 3, 0).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(store.read_calls(), 0);
}

#[tokio::test]
async fn test_search_pages_match_engine() {
    let store = two_partitions();
    let index = PlainServerIndex::new(store.clone(), store.clone());

    let mut seen = Vec::new();
    for page_no in 1..=3 {
        let page = index
            .search(None, None, SearchMode::Blur, page_no, 5)
            .await
            .unwrap();
        assert_eq!(page.total_count, 12);
        assert_eq!(page.pages_available, 3);
        assert_eq!(page.page_number, page_no);
        seen.extend(page.items);
    }
    assert_eq!(seen.len(), 12);
    assert_eq!(seen[9].id, "a-09");
    assert_eq!(seen[10].id, "b-00");
}

#[tokio::test]
async fn test_name_filter_across_partitions() {
    let store = two_partitions();
    let index = PlainServerIndex::new(store.clone(), store.clone());
    let page = index
        .search(None, Some("beta"), SearchMode::Blur, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(ids(&page.items), vec!["b-00", "b-01"]);
}
