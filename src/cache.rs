// In-memory TTL cache for parsed command results, bounded by estimated size.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

pub const DEFAULT_MAX_SIZE_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
/// Cleanup is forced above this share of the max size.
const CLEANUP_TRIGGER_RATIO: f64 = 0.75;
/// Eviction stops at this share of the max size.
const EVICTION_TARGET_RATIO: f64 = 0.70;
/// Size charged for anything the estimator cannot inspect.
const FALLBACK_ITEM_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl CachePriority {
    pub fn default_ttl(self) -> Duration {
        match self {
            CachePriority::Low => Duration::from_secs(3600),
            CachePriority::Medium => Duration::from_secs(600),
            CachePriority::High => Duration::from_secs(120),
            CachePriority::Critical => Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CacheItem {
    value: Value,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
    priority: CachePriority,
    size_bytes: usize,
}

impl CacheItem {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub item_count: usize,
    pub current_size_mb: f64,
    pub max_size_mb: f64,
    pub usage_percent: f64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate_percent: f64,
    pub items_by_priority: HashMap<CachePriority, usize>,
}

#[derive(Debug)]
struct CacheInner {
    items: HashMap<String, CacheItem>,
    current_size: usize,
    hits: u64,
    misses: u64,
    last_cleanup: Instant,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> bool {
        match self.items.remove(key) {
            Some(item) => {
                self.current_size = self.current_size.saturating_sub(item.size_bytes);
                true
            }
            None => false,
        }
    }
}

pub struct CacheManager {
    max_size_bytes: usize,
    cleanup_interval: Duration,
    inner: Mutex<CacheInner>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE_BYTES, DEFAULT_CLEANUP_INTERVAL)
    }
}

impl CacheManager {
    pub fn new(max_size_bytes: usize, cleanup_interval: Duration) -> Self {
        Self {
            max_size_bytes,
            cleanup_interval,
            inner: Mutex::new(CacheInner {
                items: HashMap::new(),
                current_size: 0,
                hits: 0,
                misses: 0,
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut CacheInner) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        self.with_inner(|inner| {
            let expired = match inner.items.get_mut(key) {
                None => {
                    inner.misses += 1;
                    return None;
                }
                Some(item) if item.is_expired(now) => true,
                Some(item) => {
                    item.last_accessed = now;
                    item.access_count += 1;
                    inner.hits += 1;
                    return Some(item.value.clone());
                }
            };
            if expired {
                inner.remove(key);
                inner.misses += 1;
            }
            None
        })
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(key, error = %e, "Cached value has unexpected shape, dropping");
                self.delete(key);
                None
            }
        }
    }

    /// Stores a value. `ttl` defaults to the priority's TTL.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>, priority: CachePriority) {
        let now = Instant::now();
        let size_bytes = estimate_size(&value);
        let item = CacheItem {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl: ttl.unwrap_or_else(|| priority.default_ttl()),
            priority,
            size_bytes,
        };
        let max = self.max_size_bytes;
        let interval = self.cleanup_interval;
        self.with_inner(|inner| {
            inner.remove(key);
            inner.items.insert(key.to_string(), item);
            inner.current_size += size_bytes;

            let over_trigger = inner.current_size as f64 > max as f64 * CLEANUP_TRIGGER_RATIO;
            if over_trigger || now.duration_since(inner.last_cleanup) >= interval {
                cleanup(inner, max, now);
            }
        });
    }

    pub fn set_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        priority: CachePriority,
    ) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl, priority),
            Err(e) => tracing::debug!(key, error = %e, "Value not cacheable"),
        }
    }

    /// Returns the cached value or computes, stores and returns it.
    /// Fallback errors are logged and yield `None`; null results are not stored.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        priority: CachePriority,
        fallback: F,
    ) -> Option<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        match fallback().await {
            Ok(Value::Null) => None,
            Ok(v) => {
                self.set(key, v.clone(), ttl, priority);
                Some(v)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, operation = "cache_fallback", "Cache fallback failed");
                None
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.with_inner(|inner| inner.remove(key))
    }

    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        self.with_inner(|inner| {
            let keys: Vec<String> = inner
                .items
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for k in &keys {
                inner.remove(k);
            }
            keys.len()
        })
    }

    pub fn clear(&self) {
        self.with_inner(|inner| {
            inner.items.clear();
            inner.current_size = 0;
        });
        tracing::info!("Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let max = self.max_size_bytes;
        self.with_inner(|inner| {
            let mut items_by_priority = HashMap::new();
            for item in inner.items.values() {
                *items_by_priority.entry(item.priority).or_insert(0) += 1;
            }
            let lookups = inner.hits + inner.misses;
            CacheStats {
                item_count: inner.items.len(),
                current_size_mb: round2(inner.current_size as f64 / (1024.0 * 1024.0)),
                max_size_mb: round2(max as f64 / (1024.0 * 1024.0)),
                usage_percent: if max > 0 {
                    round2(inner.current_size as f64 / max as f64 * 100.0)
                } else {
                    0.0
                },
                hit_count: inner.hits,
                miss_count: inner.misses,
                hit_rate_percent: if lookups > 0 {
                    round2(inner.hits as f64 / lookups as f64 * 100.0)
                } else {
                    0.0
                },
                items_by_priority,
            }
        })
    }
}

fn cleanup(inner: &mut CacheInner, max_size: usize, now: Instant) {
    inner.last_cleanup = now;
    let expired: Vec<String> = inner
        .items
        .iter()
        .filter(|(_, item)| item.is_expired(now))
        .map(|(k, _)| k.clone())
        .collect();
    for k in &expired {
        inner.remove(k);
    }

    let mut evicted = 0;
    if inner.current_size > max_size {
        let target = (max_size as f64 * EVICTION_TARGET_RATIO) as usize;
        let mut order: Vec<(CachePriority, Instant, String)> = inner
            .items
            .iter()
            .map(|(k, item)| (item.priority, item.last_accessed, k.clone()))
            .collect();
        order.sort();
        for (_, _, key) in order {
            if inner.current_size <= target {
                break;
            }
            inner.remove(&key);
            evicted += 1;
        }
    }

    if !expired.is_empty() || evicted > 0 {
        tracing::debug!(
            expired = expired.len(),
            evicted,
            size_bytes = inner.current_size,
            "Cache cleanup"
        );
    }
}

/// Rough in-memory footprint of a JSON value.
pub fn estimate_size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Number(_) | Value::Bool(_) => 8,
        Value::Array(items) => items.iter().map(estimate_size).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| k.len() + estimate_size(v)).sum(),
        Value::Null => FALLBACK_ITEM_SIZE,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
