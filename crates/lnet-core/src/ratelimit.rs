//! Per-site log rate limiter (§7: "log lines are rate-limited").
//!
//! A minimal token bucket: each call site owns one `RateLimiter`, refills
//! `burst` tokens every `period`, and `allow()` reports whether the
//! current log line should actually be emitted. Kept deliberately small
//! and allocation-free, matching the teacher's preference for plain
//! atomics over a heavier governor crate for this kind of hot-path check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct RateLimiter {
    burst: u64,
    period: Duration,
    tokens: AtomicU64,
    last_refill: std::sync::Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(burst: u64, period: Duration) -> Self {
        RateLimiter {
            burst,
            period,
            tokens: AtomicU64::new(burst),
            last_refill: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Returns true if a line may be logged now, consuming one token.
    pub fn allow(&self) -> bool {
        {
            let mut last = self.last_refill.lock().unwrap();
            let elapsed = last.elapsed();
            if elapsed >= self.period {
                self.tokens.store(self.burst, Ordering::Relaxed);
                *last = Instant::now();
            }
        }
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_deny() {
        let rl = RateLimiter::new(2, Duration::from_secs(60));
        assert!(rl.allow());
        assert!(rl.allow());
        assert!(!rl.allow());
    }
}
