pub mod cache;
pub mod search;

pub use cache::{cache_key, AvailabilityCache, CacheBackend, CacheConfig, CacheEntry, CacheError, CacheLookup, Freshness, MemoryCacheBackend};
pub use search::{SearchOutcome, SearchService};
