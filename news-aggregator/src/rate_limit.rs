use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Leaky bucket in its GCRA form: every caller reserves the next free slot
/// under a short lock and then sleeps outside it, so callers queue up in
/// order without holding anything across the wait.
#[derive(Debug)]
pub struct LeakyBucket {
    interval: Duration,
    burst: u32,
    theoretical_arrival: Mutex<Option<Instant>>,
}

impl LeakyBucket {
    pub fn new(interval: Duration) -> Self {
        Self::with_burst(interval, 1)
    }

    pub fn with_burst(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst: burst.max(1),
            theoretical_arrival: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request is allowed. Never skips; returns how long the
    /// caller waited.
    pub async fn acquire(&self) -> Duration {
        let slot = self.reserve().await;
        let now = Instant::now();
        if slot > now {
            tokio::time::sleep_until(slot).await;
            slot - now
        } else {
            Duration::ZERO
        }
    }

    async fn reserve(&self) -> Instant {
        let mut tat = self.theoretical_arrival.lock().await;
        let now = Instant::now();
        let base = match *tat {
            Some(t) if t > now => t,
            _ => now,
        };
        let tolerance = self.interval * (self.burst - 1);
        let slot = base.checked_sub(tolerance).map(|s| s.max(now)).unwrap_or(now);
        *tat = Some(base + self.interval);
        slot
    }

    /// Push the next free slot out to at least `delay` from now.
    pub async fn penalize(&self, delay: Duration) {
        let mut tat = self.theoretical_arrival.lock().await;
        let until = Instant::now() + delay;
        *tat = Some(match *tat {
            Some(t) if t > until => t,
            _ => until,
        });
    }
}

/// One bucket per source name.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, Arc<LeakyBucket>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bucket(&self, source: &str, interval: Duration) -> Arc<LeakyBucket> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(source) {
                if bucket.interval() == interval {
                    return bucket.clone();
                }
            }
        }
        let mut buckets = self.buckets.write().await;
        match buckets.get(source) {
            Some(bucket) if bucket.interval() == interval => bucket.clone(),
            _ => {
                // New source, or its delay changed on config reload.
                let bucket = Arc::new(LeakyBucket::new(interval));
                buckets.insert(source.to_string(), bucket.clone());
                bucket
            }
        }
    }

    pub async fn acquire(&self, source: &str, interval: Duration) -> Duration {
        let waited = self.bucket(source, interval).await.acquire().await;
        if !waited.is_zero() {
            debug!("Rate limiting {}: waited {:?}", source, waited);
        }
        waited
    }

    pub async fn penalize(&self, source: &str, interval: Duration, delay: Duration) {
        self.bucket(source, interval).await.penalize(delay).await;
    }
}
