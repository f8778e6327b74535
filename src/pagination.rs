//! Cross-partition pagination.
//!
//! The backing store only paginates inside one partition and has no global
//! ordering index. [`paginate_partitions`] turns a global `(offset, limit)`
//! over the concatenation of sorted partitions into per-partition page
//! requests and stitches the results.
//!
//! # Algorithm
//!
//! 1. Read each partition's total with a `page_size = 1` request.
//! 2. While the remaining offset covers a whole partition, subtract its
//!    total and skip it without reading any of its records.
//! 3. In the partition holding the start point, fetch pages of size
//!    `limit` beginning at page `offset / limit + 1`, dropping the first
//!    `offset % limit` items of that first page.
//! 4. Continue into the following partitions from offset 0 until `limit`
//!    items are collected or the partitions run out.
//!
//! Store calls are bounded by the partitions touched, not by record count.
//! Callers that also need the grand total use [`partition_totals`] once and
//! hand the result to [`paginate_counted`], which skips step 1.
//! Results come back in partition-sort order, then in the store's native
//! order within a partition.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexEntry, PageResult};
use crate::store::{index_entry_from_document, BackingStore, FindQuery, SearchMode, StoredDocument};

/// One partition's paginated listing.
#[async_trait]
pub trait PartitionPager: Send + Sync {
    type Item: Send;

    async fn fetch_page(
        &self,
        partition: &str,
        page_no: usize,
        page_size: usize,
    ) -> Result<PageResult<Self::Item>>;
}

/// Collect up to `limit` items starting at global `offset`.
///
/// `partitions` must already be in the desired (sorted) order.
pub async fn paginate_partitions<P: PartitionPager + ?Sized>(
    pager: &P,
    partitions: &[String],
    offset: usize,
    limit: usize,
) -> Result<Vec<P::Item>> {
    let mut result = Vec::new();
    if limit == 0 {
        return Ok(result);
    }

    let mut remaining_offset = offset;
    for partition in partitions {
        if result.len() >= limit {
            break;
        }
        let total = partition_total(pager, partition).await?;
        drain_partition(pager, partition, total, &mut remaining_offset, limit, &mut result).await?;
    }
    Ok(result)
}

/// Count every partition once, keeping the order of `partitions`.
pub async fn partition_totals<P: PartitionPager + ?Sized>(
    pager: &P,
    partitions: &[String],
) -> Result<Vec<(String, usize)>> {
    let mut totals = Vec::with_capacity(partitions.len());
    for partition in partitions {
        totals.push((partition.clone(), partition_total(pager, partition).await?));
    }
    Ok(totals)
}

/// [`paginate_partitions`] over partitions whose totals are already known,
/// so no partition is counted a second time.
pub async fn paginate_counted<P: PartitionPager + ?Sized>(
    pager: &P,
    totals: &[(String, usize)],
    offset: usize,
    limit: usize,
) -> Result<Vec<P::Item>> {
    let mut result = Vec::new();
    if limit == 0 {
        return Ok(result);
    }

    let mut remaining_offset = offset;
    for (partition, total) in totals {
        if result.len() >= limit {
            break;
        }
        drain_partition(pager, partition, *total, &mut remaining_offset, limit, &mut result).await?;
    }
    Ok(result)
}

async fn partition_total<P: PartitionPager + ?Sized>(pager: &P, partition: &str) -> Result<usize> {
    Ok(pager.fetch_page(partition, 1, 1).await?.total_count)
}

/// Take this partition's share of the window, or consume it from the
/// remaining offset when the window starts further on.
async fn drain_partition<P: PartitionPager + ?Sized>(
    pager: &P,
    partition: &str,
    total: usize,
    remaining_offset: &mut usize,
    limit: usize,
    result: &mut Vec<P::Item>,
) -> Result<()> {
    if total == 0 {
        return Ok(());
    }
    if *remaining_offset >= total {
        *remaining_offset -= total;
        return Ok(());
    }

    let page_size = limit;
    let mut skip = *remaining_offset % page_size;
    let mut page_no = *remaining_offset / page_size + 1;
    *remaining_offset = 0;
    loop {
        let wanted = limit - result.len();
        if wanted == 0 {
            break;
        }
        let page = pager.fetch_page(partition, page_no, page_size).await?;
        let fetched = page.items.len();
        if fetched == 0 {
            break;
        }
        result.extend(page.items.into_iter().skip(skip).take(wanted));
        skip = 0;
        if fetched < page_size || page_no.saturating_mul(page_size) >= total {
            break;
        }
        page_no += 1;
    }
    Ok(())
}

/// Raw server documents, optionally filtered by a name match.
pub struct StoreDocumentPager<'a> {
    store: &'a dyn BackingStore,
    name: Option<&'a str>,
    search: SearchMode,
}

impl<'a> StoreDocumentPager<'a> {
    pub fn new(store: &'a dyn BackingStore, name: Option<&'a str>) -> Self {
        Self {
            store,
            name,
            search: SearchMode::Blur,
        }
    }

    pub fn with_search(mut self, search: SearchMode) -> Self {
        self.search = search;
        self
    }
}

#[async_trait]
impl PartitionPager for StoreDocumentPager<'_> {
    type Item = StoredDocument;

    async fn fetch_page(
        &self,
        partition: &str,
        page_no: usize,
        page_size: usize,
    ) -> Result<PageResult<StoredDocument>> {
        let query = FindQuery::servers(partition, self.name, self.search, page_no, page_size);
        self.store.find_page(&query).await
    }
}

/// Pager over server locations, optionally filtered by a name match.
pub struct StoreNamePager<'a> {
    documents: StoreDocumentPager<'a>,
}

impl<'a> StoreNamePager<'a> {
    pub fn new(store: &'a dyn BackingStore, name: Option<&'a str>) -> Self {
        Self {
            documents: StoreDocumentPager::new(store, name),
        }
    }

    pub fn with_search(self, search: SearchMode) -> Self {
        Self {
            documents: self.documents.with_search(search),
        }
    }
}

#[async_trait]
impl PartitionPager for StoreNamePager<'_> {
    type Item = IndexEntry;

    async fn fetch_page(
        &self,
        partition: &str,
        page_no: usize,
        page_size: usize,
    ) -> Result<PageResult<IndexEntry>> {
        let page = self.documents.fetch_page(partition, page_no, page_size).await?;
        let entries = page
            .items
            .iter()
            .map(index_entry_from_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(PageResult::new(
            entries,
            page.total_count,
            page.page_number,
            page_size,
        ))
    }
}
