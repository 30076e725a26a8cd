use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Time after the last access at which a cached name is dropped.
const NAME_EXPIRY: Duration = Duration::from_secs(5 * 60);

struct CachedName {
    name: Arc<str>,
    last_access: Instant,
}

/// Interns transaction names, so that retained events with the same name share one allocation.
///
/// The cache holds at most as many names as a reservoir holds events and evicts the least recently
/// used name first. Names expire five minutes after their last access.
pub struct NameCache {
    cache: Mutex<LruCache<Arc<str>, CachedName>>,
    expiry: Duration,
}

impl NameCache {
    /// Creates a cache for up to `capacity` names. A capacity of zero holds one name.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            expiry: NAME_EXPIRY,
        }
    }

    /// Returns the shared instance of `name`.
    pub fn intern_name(&self, name: &str) -> Arc<str> {
        self.intern_at(name, Instant::now())
    }

    fn intern_at(&self, name: &str, now: Instant) -> Arc<str> {
        let mut cache = self.cache.lock();

        if let Some(cached) = cache.get_mut(name) {
            if now.saturating_duration_since(cached.last_access) < self.expiry {
                cached.last_access = now;
                return Arc::clone(&cached.name);
            }
        }

        let name: Arc<str> = Arc::from(name);
        cache.put(
            Arc::clone(&name),
            CachedName {
                name: Arc::clone(&name),
                last_access: now,
            },
        );
        name
    }

    /// Returns the maximum number of cached names.
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Returns the number of cached names, including expired ones not yet replaced.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns `true` if no names are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for NameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
