//! Per-domain rate limiting and response caching.
//!
//! These are the only cross-task shared mutable structures in a collection
//! run. Both are internally synchronized and owned by one run's crawler,
//! never process-wide singletons, so concurrent runs for different parents
//! don't interfere.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Enforces a minimum interval between requests to the same domain.
///
/// `acquire` reserves the next permitted slot under the lock and then sleeps
/// outside it, so N callers against one domain are serialized at
/// `min_interval` spacing without blocking callers for other domains.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `domain` is permitted.
    pub async fn acquire(&self, domain: &str) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut map = self.last_request.lock().await;
            let now = Instant::now();
            let slot = match map.get(domain) {
                Some(last) => (*last + self.min_interval).max(now),
                None => now,
            };
            map.insert(domain.to_string(), slot);
            slot
        };

        if slot > Instant::now() {
            trace!(domain, "rate limiter sleeping");
            tokio::time::sleep_until(slot).await;
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// Time-bounded response cache keyed by normalized URL.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get a cached body if present and not expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((stored_at, body)) if stored_at.elapsed() < self.ttl => Some(body.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a body under a normalized-URL key.
    pub async fn put(&self, key: &str, body: String) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (Instant::now(), body));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_requests_are_spaced() {
        let interval = Duration::from_millis(50);
        let limiter = RateLimiter::new(interval);

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("example.com").await;
        }
        // N sequential requests take at least (N - 1) * interval.
        assert!(start.elapsed() >= interval * 2, "elapsed {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn domains_are_limited_independently() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        limiter.acquire("a.example.com").await;
        let start = Instant::now();
        limiter.acquire("b.example.com").await;
        // A different domain is not delayed by the first.
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cache_hit_and_expiry() {
        let cache = ResponseCache::new(Duration::from_millis(40));
        cache.put("https://example.com/a", "body".into()).await;

        assert_eq!(cache.get("https://example.com/a").await.as_deref(), Some("body"));
        assert!(cache.get("https://example.com/b").await.is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("https://example.com/a").await.is_none());
    }
}
