//! TTL-cached token buckets keyed by `session + rate`.

use std::sync::Arc;
use std::time::Duration;

use byte_unit::Byte;
use leaky_bucket::RateLimiter;
use moka::sync::Cache;

use seedgate_core::{Error, Result};

/// Idle eviction window for buckets.
const BUCKET_TTL: Duration = Duration::from_secs(30 * 60);

/// Refill slice, chosen small enough to keep delivery smooth.
const REFILL_INTERVAL: Duration = Duration::from_millis(100);

/// Pool of per-session token buckets.
///
/// The rate string is parsed as a humanized size; a bucket delivers
/// `parsed / 8` bytes per second with a burst capacity of `parsed` bytes.
/// Buckets idle for half an hour are evicted.
pub struct BucketPool {
    buckets: Cache<String, Arc<RateLimiter>>,
}

impl Default for BucketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketPool {
    /// Empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Cache::builder().time_to_idle(BUCKET_TTL).build(),
        }
    }

    /// Bucket for `(session_id, rate)`, creating it on first use. Repeated
    /// calls within the idle window return the same bucket, so one session
    /// cannot widen its budget by reconnecting.
    pub fn get(&self, session_id: &str, rate: &str) -> Result<Arc<RateLimiter>> {
        let parsed = Byte::parse_str(rate, true)
            .map(|byte| byte.as_u64())
            .map_err(|_| Error::transient(format!("failed to parse rate {rate:?}")))?;
        if parsed == 0 {
            return Err(Error::transient(format!("rate {rate:?} is zero")));
        }
        let key = format!("{session_id}{rate}");
        Ok(self.buckets.get_with(key, || build_bucket(parsed)))
    }

    /// Number of live buckets (for observability).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }

    /// Whether the pool currently holds no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_bucket(parsed: u64) -> Arc<RateLimiter> {
    let per_second = (parsed / 8).max(1);
    let capacity = usize::try_from(parsed).unwrap_or(usize::MAX);
    let slices = (1000 / REFILL_INTERVAL.as_millis()) as u64;
    let refill = usize::try_from((per_second / slices).max(1)).unwrap_or(usize::MAX);
    Arc::new(
        RateLimiter::builder()
            .max(capacity)
            .initial(capacity)
            .refill(refill)
            .interval(REFILL_INTERVAL)
            .build(),
    )
}
