//! Per-service minimum-interval rate limiting for MicroQL (§4.9 "rate
//! limiting").
//!
//! Unlike a token bucket, a service's gate only cares about the time since
//! its *last start* — calls are spaced out, never burst-then-starved. Each
//! service name gets its own independent gate.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks the start time of the most recent call per service name and
/// delays the next one until the configured minimum interval has elapsed.
///
/// Scoped to one `Plan` execution — never a process-wide singleton, so
/// concurrent `query()` calls in the same process don't throttle each other.
#[derive(Clone, Default)]
pub struct RateLimiter {
    last_start: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter { last_start: DashMap::new() }
    }

    /// Block until `interval` has elapsed since this service's last call,
    /// then record the new start time. Calls to different services never
    /// contend with each other.
    pub async fn gate(&self, service: &str, interval: Duration) {
        let now = Instant::now();
        let scheduled_start = {
            let mut entry = self
                .last_start
                .entry(service.to_string())
                .or_insert_with(|| now.checked_sub(interval).unwrap_or(now));
            let earliest = *entry.value() + interval;
            let start = earliest.max(now);
            *entry.value_mut() = start;
            start
        };
        if scheduled_start > now {
            tokio::time::sleep(scheduled_start - now).await;
        }
    }
}
