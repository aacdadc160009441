//! Buffer layer: in-memory cache of committed node pages with LRU
//! eviction.

mod lru;
mod pool;

pub use pool::{CacheStats, PageCache};
