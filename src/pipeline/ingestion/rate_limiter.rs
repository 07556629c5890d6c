use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-host pacing: consecutive requests to the same host are at least
/// `min_interval` apart, no matter how many tasks share the limiter.
#[derive(Debug)]
pub struct HostRateLimiter {
    min_interval: Duration,
    // next free slot per host
    slots: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot for `host` and wait until it arrives.
    ///
    /// The reservation happens under the lock, the wait does not, so callers
    /// for other hosts are never held up. Returns the granted slot.
    pub async fn acquire(&self, host: &str) -> Instant {
        let slot = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(last) => (*last + self.min_interval).max(now),
                None => now,
            };
            slots.insert(host.to_string(), slot);
            slot
        };
        tokio::time::sleep_until(slot).await;
        slot
    }

    #[cfg(test)]
    async fn tracked_hosts(&self) -> usize {
        self.slots.lock().await.len()
    }
}
