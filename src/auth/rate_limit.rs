//! Rate limiting primitives for auth flows.
//!
//! Each [`TokenBucket`] is a fixed-window bucket per key: `capacity` tokens
//! refill all at once when `window` has elapsed since the window started.
//! Buckets live in process memory and reset on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use super::state::RateLimitConfig;

/// Once the map holds this many keys, elapsed buckets are evicted on insert.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Rate limited: next token in {}s", countdown.as_secs())]
pub struct RateLimited {
    pub countdown: Duration,
}

pub trait RateLimiter: Send + Sync {
    /// Take one token for `key`, returning the tokens left in the window.
    ///
    /// # Errors
    /// Returns [`RateLimited`] with the time until the bucket refills.
    fn take(&self, key: &str) -> Result<u32, RateLimited>;

    /// Time until `key` gets a fresh token; zero when one is available now.
    fn countdown(&self, key: &str) -> Duration;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn take(&self, _key: &str) -> Result<u32, RateLimited> {
        Ok(u32::MAX)
    }

    fn countdown(&self, _key: &str) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug)]
struct Bucket {
    available: u32,
    window_start: Instant,
}

impl Bucket {
    fn refill_if_elapsed(&mut self, capacity: u32, window: Duration, now: Instant) {
        if now >= self.window_start + window {
            self.available = capacity;
            self.window_start = now;
        }
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    // The map lock is only held to find or insert a key; takes on a key
    // serialize on that key's own mutex.
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: RateLimitConfig) -> Self {
        Self::new(config.capacity, config.window)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop buckets whose window has elapsed; they would refill on next use anyway.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets.retain(|_, bucket| match bucket.try_lock() {
            Ok(bucket) => now < bucket.window_start + self.window,
            // In use right now, keep it.
            Err(_) => true,
        });
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(bucket);
        }

        if self.tracked_keys() >= PRUNE_THRESHOLD {
            self.prune();
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                available: self.capacity,
                window_start: Instant::now(),
            }))
        }))
    }

    fn remaining(&self, bucket: &Bucket, now: Instant) -> Duration {
        (bucket.window_start + self.window).saturating_duration_since(now)
    }
}

impl RateLimiter for TokenBucket {
    fn take(&self, key: &str) -> Result<u32, RateLimited> {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        bucket.refill_if_elapsed(self.capacity, self.window, now);

        if bucket.available > 0 {
            bucket.available -= 1;
            Ok(bucket.available)
        } else {
            Err(RateLimited {
                countdown: self.remaining(&bucket, now),
            })
        }
    }

    fn countdown(&self, key: &str) -> Duration {
        let bucket = {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            match buckets.get(key) {
                Some(bucket) => Arc::clone(bucket),
                None => return Duration::ZERO,
            }
        };
        let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.remaining(&bucket, Instant::now())
    }
}

/// Build the limiter for one flow, or a no-op when limiting is disabled.
#[must_use]
pub fn limiter_for(enabled: bool, config: RateLimitConfig) -> Arc<dyn RateLimiter> {
    if enabled {
        Arc::new(TokenBucket::from_config(config))
    } else {
        Arc::new(NoopRateLimiter)
    }
}
