use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tarmac_core::search::{FlightSearchRequest, FlightSearchResult};
use tarmac_core::{Clock, CoreError};
use tokio::sync::RwLock;
use tracing::debug;

/// Deterministic key for a search: hex SHA-256 of its canonical form.
pub fn cache_key(request: &FlightSearchRequest) -> String {
    hex::encode(Sha256::digest(request.canonical_key().as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Valid,
    /// Past `expires_at` but inside the grace window. Never authoritative.
    Stale,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: FlightSearchResult,
    pub lowest_fare: Option<Decimal>,
    pub highest_fare: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a lookup. `data` is withheld once the entry has expired.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub data: Option<FlightSearchResult>,
    pub freshness: Freshness,
}

impl CacheLookup {
    pub fn is_valid(&self) -> bool {
        self.freshness == Freshness::Valid
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend failure: {0}")]
    Backend(String),

    #[error("Cache entry could not be (de)serialised: {0}")]
    Serialization(String),
}

impl From<CacheError> for CoreError {
    fn from(err: CacheError) -> Self {
        CoreError::Storage(err.to_string())
    }
}

/// Where entries live. `retain_for` is how long the backend must keep the
/// entry, which covers the stale grace window.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn store(&self, entry: &CacheEntry, retain_for: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry, _retain_for: Duration) -> Result<(), CacheError> {
        self.entries.write().await.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    #[serde(default = "default_stale_grace_seconds")]
    pub stale_grace_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    900
}

fn default_stale_grace_seconds() -> i64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            stale_grace_seconds: default_stale_grace_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub refreshes: u64,
}

/// Search result cache with an injected clock.
///
/// Refresh is the only mutator; concurrent refreshes of one key are
/// last-write-wins.
pub struct AvailabilityCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    refreshes: AtomicU64,
    per_key: Mutex<HashMap<String, KeyStats>>,
}

impl AvailabilityCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            backend,
            clock,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            per_key: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_seconds)
    }

    fn grace(&self) -> Duration {
        Duration::seconds(self.config.stale_grace_seconds)
    }

    pub fn freshness(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        if now < entry.expires_at {
            Freshness::Valid
        } else if now < entry.expires_at + self.grace() {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub async fn lookup(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let entry = self.backend.load(key).await?;
        let now = self.clock.now();

        let lookup = match entry {
            Some(entry) => match self.freshness(&entry, now) {
                Freshness::Expired => CacheLookup {
                    data: None,
                    freshness: Freshness::Expired,
                },
                freshness => CacheLookup {
                    data: Some(entry.data),
                    freshness,
                },
            },
            None => CacheLookup {
                data: None,
                freshness: Freshness::Expired,
            },
        };

        self.count(key, lookup.freshness);
        debug!(key, freshness = ?lookup.freshness, "availability cache lookup");
        Ok(lookup)
    }

    fn count(&self, key: &str, freshness: Freshness) {
        let mut per_key = self.per_key.lock();
        let stats = per_key.entry(key.to_string()).or_default();
        match freshness {
            Freshness::Valid => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                stats.hits += 1;
            }
            Freshness::Stale => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                stats.stale += 1;
            }
            Freshness::Expired => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                stats.misses += 1;
            }
        }
    }

    /// Store fresh data under `key`. `ttl` defaults to the configured TTL.
    pub async fn refresh(
        &self,
        key: &str,
        data: FlightSearchResult,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError> {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| self.ttl());
        let entry = CacheEntry {
            key: key.to_string(),
            lowest_fare: data.lowest_fare(),
            highest_fare: data.highest_fare(),
            data,
            created_at: now,
            expires_at: now + ttl,
        };
        self.backend.store(&entry, ttl + self.grace()).await?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.backend.remove(key).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }

    pub fn key_stats(&self, key: &str) -> KeyStats {
        self.per_key.lock().get(key).copied().unwrap_or_default()
    }
}
