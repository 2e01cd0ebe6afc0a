//! Dual-tier cache: an in-memory map in front of an optional persistent store.
//!
//! Entries are JSON envelopes `{data, timestamp}`. Freshness is judged at read
//! time against the expiry of the requested [`ExpiryKind`]; stale or corrupt
//! entries are purged from both tiers. Persistent-tier failures never reach
//! the caller: the cache degrades to memory-only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use nimbus_core::CacheConfig;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::PersistentStore;

/// Namespace for cache entries inside the persistent store.
pub const CACHE_KEY_PREFIX: &str = "nimbus_cache:";

/// Key prefixes removed by [`WeatherCache::clear_weather_cache`].
pub const WEATHER_KEY_PREFIXES: &[&str] = &["weather_", "nearby_weather_"];

fn is_weather_key(key: &str) -> bool {
    WEATHER_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    /// Weather and nearby weather
    Short,
    /// Locations and geocoding results
    Long,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch millis
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub short_expiry_ms: i64,
    pub long_expiry_ms: i64,
    pub eviction_threshold_bytes: u64,
    pub stale_age_ms: i64,
}

impl CachePolicy {
    pub fn expiry_ms(&self, kind: ExpiryKind) -> i64 {
        match kind {
            ExpiryKind::Short => self.short_expiry_ms,
            ExpiryKind::Long => self.long_expiry_ms,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        const MINUTE_MS: i64 = 60 * 1000;
        Self {
            short_expiry_ms: config.short_expiry_minutes as i64 * MINUTE_MS,
            long_expiry_ms: config.long_expiry_hours as i64 * 60 * MINUTE_MS,
            eviction_threshold_bytes: config.eviction_threshold_bytes,
            stale_age_ms: config.stale_age_minutes as i64 * MINUTE_MS,
        }
    }
}

/// Cache service shared by the forecast, geocoding and nearby-weather layers.
pub struct WeatherCache {
    memory: Mutex<HashMap<String, CacheEntry<Value>>>,
    persistent: Option<Arc<dyn PersistentStore>>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
}

impl WeatherCache {
    pub fn new(persistent: Option<Arc<dyn PersistentStore>>, policy: CachePolicy) -> Self {
        Self::with_clock(persistent, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        persistent: Option<Arc<dyn PersistentStore>>,
        policy: CachePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if persistent.is_none() {
            tracing::info!("Persistent cache tier unavailable, caching in memory only");
        }
        Self {
            memory: Mutex::new(HashMap::new()),
            persistent,
            policy,
            clock,
        }
    }

    /// Memory-only cache with default expiries.
    pub fn in_memory() -> Self {
        Self::new(None, CachePolicy::default())
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn persistent_key(key: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, key)
    }

    fn is_expired(&self, timestamp: i64, kind: ExpiryKind, now: i64) -> bool {
        now - timestamp > self.policy.expiry_ms(kind)
    }

    /// Read a fresh entry, promoting persistent hits into memory.
    pub fn get<T: DeserializeOwned>(&self, key: &str, kind: ExpiryKind) -> Option<T> {
        let now = self.clock.now_millis();

        let in_memory = self.memory.lock().get(key).cloned();
        if let Some(entry) = in_memory {
            if self.is_expired(entry.timestamp, kind, now) {
                tracing::debug!("Cache entry expired: {}", key);
                self.remove(key);
                return None;
            }
            return match serde_json::from_value(entry.data) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!("Cached value for {} has unexpected shape: {}", key, e);
                    self.remove(key);
                    None
                }
            };
        }

        let store = self.persistent.as_ref()?;
        let raw = match store.get(&Self::persistent_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("Persistent cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry<Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Corrupt cache entry {} purged: {}", key, e);
                self.remove(key);
                return None;
            }
        };

        if self.is_expired(entry.timestamp, kind, now) {
            tracing::debug!("Persistent cache entry expired: {}", key);
            self.remove(key);
            return None;
        }

        match serde_json::from_value::<T>(entry.data.clone()) {
            Ok(data) => {
                self.memory.lock().insert(key.to_string(), entry);
                Some(data)
            }
            Err(e) => {
                tracing::warn!("Corrupt cache entry {} purged: {}", key, e);
                self.remove(key);
                None
            }
        }
    }

    /// Write to both tiers. Persistent-tier failures are logged and dropped.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) {
        let value = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Value for {} is not cacheable: {}", key, e);
                return;
            }
        };
        let entry = CacheEntry {
            data: value,
            timestamp: self.clock.now_millis(),
        };

        if let Some(store) = &self.persistent {
            match serde_json::to_string(&entry) {
                Ok(raw) => self.write_persistent(store.as_ref(), key, &raw),
                Err(e) => tracing::warn!("Failed to serialize cache entry {}: {}", key, e),
            }
        }

        self.memory.lock().insert(key.to_string(), entry);
    }

    fn write_persistent(&self, store: &dyn PersistentStore, key: &str, raw: &str) {
        match store.estimated_size() {
            Ok(size) if size > self.policy.eviction_threshold_bytes => {
                tracing::info!(
                    "Persistent cache at {} bytes (threshold {}), evicting stale entries",
                    size,
                    self.policy.eviction_threshold_bytes
                );
                self.evict_stale(store);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Could not estimate persistent cache size: {}", e),
        }

        let persistent_key = Self::persistent_key(key);
        match store.set(&persistent_key, raw) {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded) => {
                tracing::warn!("Persistent cache quota exceeded writing {}, evicting and retrying", key);
                self.evict_stale(store);
                if let Err(e) = store.set(&persistent_key, raw) {
                    tracing::warn!("Dropping persistent write for {}: {}", key, e);
                }
            }
            Err(e) => tracing::debug!("Persistent cache write failed for {}: {}", key, e),
        }
    }

    /// Remove cache entries older than the stale age (or unreadable), regardless
    /// of their nominal expiry. Returns the number removed.
    fn evict_stale(&self, store: &dyn PersistentStore) -> usize {
        let now = self.clock.now_millis();
        let keys = match store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!("Could not list persistent cache keys: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(CACHE_KEY_PREFIX)) {
            let stale = match store.get(key) {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry<Value>>(&raw) {
                    Ok(entry) => now - entry.timestamp > self.policy.stale_age_ms,
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(_) => true,
            };
            if stale && store.remove(key).is_ok() {
                removed += 1;
            }
        }

        tracing::info!("Evicted {} stale persistent cache entries", removed);
        removed
    }

    /// Remove a single key from both tiers.
    pub fn remove(&self, key: &str) {
        self.memory.lock().remove(key);
        if let Some(store) = &self.persistent {
            if let Err(e) = store.remove(&Self::persistent_key(key)) {
                tracing::debug!("Persistent cache remove failed for {}: {}", key, e);
            }
        }
    }

    /// Remove every cache entry from both tiers.
    pub fn clear(&self) {
        self.memory.lock().clear();
        self.purge_persistent(|_| true);
        tracing::info!("Cache cleared");
    }

    /// Remove only weather entries from both tiers.
    pub fn clear_weather_cache(&self) {
        self.memory
            .lock()
            .retain(|key, _| !is_weather_key(key));
        self.purge_persistent(is_weather_key);
        tracing::info!("Weather cache cleared");
    }

    fn purge_persistent(&self, matches: impl Fn(&str) -> bool) {
        let Some(store) = &self.persistent else {
            return;
        };
        let keys = match store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!("Could not list persistent cache keys: {}", e);
                return;
            }
        };
        for key in keys {
            if let Some(logical) = key.strip_prefix(CACHE_KEY_PREFIX) {
                if matches(logical) {
                    if let Err(e) = store.remove(&key) {
                        tracing::debug!("Persistent cache remove failed for {}: {}", logical, e);
                    }
                }
            }
        }
    }
}
