//! Shared cache of decoded node pages.
//!
//! Only committed pages enter the cache, and a committed page id is never
//! rewritten while a snapshot can reach it, so entries never go stale and
//! readers can share them without copying. A commit installs the nodes it
//! wrote and drops any cached copy of a page it reused.

use crate::buffer::lru::LruOrder;
use crate::error::Result;
use crate::page::SlottedPage;
use crate::types::PageId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub cached_pages: usize,
    pub capacity: usize,
}

struct Inner {
    pages: HashMap<PageId, Arc<SlottedPage>>,
    order: LruOrder<PageId>,
}

/// LRU page cache
pub struct PageCache {
    inner: Mutex<Inner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    /// Create a cache holding up to `capacity` pages (0 disables caching)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pages: HashMap::with_capacity(capacity),
                order: LruOrder::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached page
    pub fn get(&self, page_id: PageId) -> Option<Arc<SlottedPage>> {
        let mut inner = self.inner.lock();
        let page = inner.pages.get(&page_id).cloned()?;
        inner.order.touch(page_id);
        Some(page)
    }

    /// Return the cached page, or load and cache it.
    ///
    /// `load` runs without the cache lock held.
    pub fn get_or_load<F>(&self, page_id: PageId, load: F) -> Result<Arc<SlottedPage>>
    where
        F: FnOnce() -> Result<SlottedPage>,
    {
        if let Some(page) = self.get(page_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let page = Arc::new(load()?);
        self.insert(page_id, Arc::clone(&page));
        Ok(page)
    }

    /// Cache `page` under `page_id`, evicting the oldest entries if full
    pub fn insert(&self, page_id: PageId, page: Arc<SlottedPage>) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        inner.pages.insert(page_id, page);
        inner.order.touch(page_id);

        while inner.pages.len() > self.capacity {
            let Some(victim) = inner.order.pop_oldest() else {
                break;
            };
            inner.pages.remove(&victim);
            trace!(page = %victim, "evicted page from cache");
        }
    }

    /// Drop a page from the cache
    pub fn invalidate(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&page_id).is_some() {
            inner.order.remove(&page_id);
        }
    }

    /// Drop every cached page
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pages.clear();
        inner.order.clear();
    }

    /// Number of cached pages
    pub fn len(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached pages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached_pages: self.len(),
            capacity: self.capacity,
        }
    }
}
