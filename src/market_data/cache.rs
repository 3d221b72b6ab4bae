// =============================================================================
// TTL Cache with per-key single-flight
// =============================================================================
//
// Maps `(operation, normalised arguments)` to `(value, expiry)`. Each key owns
// an async mutex: the first caller for a cold or expired key holds it across
// the upstream fetch, and concurrent callers for the same key wait on it and
// then read the freshly stored value instead of issuing their own request.
//
// Errors are never stored. A failed fetch leaves the slot empty, so the next
// waiter (or the next poll) retries.
//
// The cache lives for the lifetime of the process. Dropping a fetch future
// mid-flight releases the key lock without writing, leaving the previous
// entry (if any) intact.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Identifies one cacheable call.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub operation: &'static str,
    pub args: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, args: impl Into<String>) -> Self {
        Self {
            operation,
            args: args.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.operation, self.args)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

type Slot<V> = Arc<tokio::sync::Mutex<Option<CacheEntry<V>>>>;

/// Process-lifetime TTL cache. Cheap to share behind an `Arc`.
pub struct TtlCache<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key` if it has not expired, otherwise run
    /// `fetch`, store its success for `ttl`, and return it.
    pub async fn get_or_fetch<E, F, Fut>(&self, key: CacheKey, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
                .clone()
        };

        // Held across the fetch: this is what coalesces concurrent callers.
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.expires_at > Instant::now() {
                debug!(key = %key, "cache hit");
                return Ok(entry.value.clone());
            }
        }

        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache miss — fetching");
        let value = fetch().await?;
        *guard = Some(CacheEntry {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    /// Drop entries whose TTL has elapsed. Slots currently being filled are
    /// left alone.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|e| e.expires_at > now),
            Err(_) => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Number of keys currently tracked (fresh, expired, or in flight).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("keys", &self.len())
            .finish()
    }
}
