//! Independent limiters per key.
//!
//! [`PerKey`] lazily creates one limiter per key from a factory, so each user
//! or tenant gets its own budget. The number of tracked keys is bounded: when
//! it exceeds `max_keys`, the least recently used key is evicted and starts
//! fresh if it returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::RateLimiter;

const DEFAULT_MAX_KEYS: usize = 10_000;

type Factory<L> = Box<dyn Fn() -> L + Send + Sync>;

struct Entry<L> {
    limiter: Arc<L>,
    /// Value of the access counter at the last lookup.
    last_access: u64,
}

pub struct PerKey<L> {
    factory: Factory<L>,
    limiters: Mutex<HashMap<String, Entry<L>>>,
    max_keys: usize,
    access_counter: AtomicU64,
}

impl<L: RateLimiter> PerKey<L> {
    /// Keys are created on first use by calling `factory`.
    pub fn new(factory: impl Fn() -> L + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            limiters: Mutex::new(HashMap::new()),
            max_keys: DEFAULT_MAX_KEYS,
            access_counter: AtomicU64::new(0),
        }
    }

    /// Bounds the number of tracked keys. Default: 10,000. Values below one
    /// are treated as one.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Decides whether a request for `key` arriving at `at` is admitted.
    pub fn allow(&self, key: &str, at: Instant) -> bool {
        self.limiter_for(key).allow(at)
    }

    pub fn allow_now(&self, key: &str) -> bool {
        self.allow(key, Instant::now())
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.limiters.lock().len()
    }

    // The map lock is released before the limiter itself is consulted.
    fn limiter_for(&self, key: &str) -> Arc<L> {
        let order = self.access_counter.fetch_add(1, Ordering::Relaxed);
        let mut limiters = self.limiters.lock();

        if let Some(entry) = limiters.get_mut(key) {
            entry.last_access = order;
            return Arc::clone(&entry.limiter);
        }

        let limiter = Arc::new((self.factory)());
        limiters.insert(
            key.to_owned(),
            Entry {
                limiter: Arc::clone(&limiter),
                last_access: order,
            },
        );
        if limiters.len() > self.max_keys {
            evict_least_recent(&mut limiters);
        }
        limiter
    }
}

fn evict_least_recent<L>(limiters: &mut HashMap<String, Entry<L>>) {
    let oldest = limiters
        .iter()
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        debug!(key = %key, "evicting least recently used limiter key");
        limiters.remove(&key);
    }
}

impl<L> std::fmt::Debug for PerKey<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerKey")
            .field("tracked_keys", &self.limiters.lock().len())
            .field("max_keys", &self.max_keys)
            .finish_non_exhaustive()
    }
}
