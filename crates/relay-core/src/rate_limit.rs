use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use relay_types::UserId;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_CAPACITY: u32 = 20;

#[derive(Debug, Clone, Copy)]
struct RateCounter {
    count: u32,
    window_start: Instant,
}

/// Per-actor fixed-window admission control.
///
/// A burst straddling a window boundary can get up to twice the capacity
/// through; that approximation is accepted. Counters are never evicted.
pub struct RateLimiter {
    window: Duration,
    capacity: u32,
    counters: Mutex<HashMap<UserId, RateCounter>>,
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: u32) -> Self {
        Self {
            window,
            capacity,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, actor: UserId) -> bool {
        self.admit_at(actor, Instant::now())
    }

    /// Count one admission for `actor` at `now`. Returns false once the
    /// actor is over capacity for the current window.
    pub fn admit_at(&self, actor: UserId, now: Instant) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        let counter = counters.entry(actor).or_insert(RateCounter {
            count: 0,
            window_start: now,
        });

        if counter.count == 0 || now.saturating_duration_since(counter.window_start) > self.window {
            counter.count = 1;
            counter.window_start = now;
            return true;
        }

        counter.count = counter.count.saturating_add(1);
        if counter.count > self.capacity {
            debug!("Rate limit hit for {} ({} in window)", actor, counter.count);
            return false;
        }
        true
    }

    /// Number of actors with a counter. Grows with distinct actors.
    pub fn tracked_actors(&self) -> usize {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}
