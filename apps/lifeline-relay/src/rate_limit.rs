use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Join-attempt limits applied per source address.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct AttemptWindow {
    first_attempt: Instant,
    attempts: u32,
}

/// Per-address join limiter. The window is fixed from the first attempt
/// in it: once `window` has fully elapsed since that first attempt the
/// counter starts over, and a rejection reports the window's remaining
/// time as the retry hint.
///
/// Source addresses are best-effort (header-derived upstream, spoofable)
/// so this dampens abuse; it is not an identity check.
pub struct JoinRateLimiter {
    windows: DashMap<IpAddr, AttemptWindow>,
    config: RateLimitConfig,
}

impl JoinRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Record one attempt from `addr`. `Err` carries how long the caller
    /// should wait before the window opens again.
    pub fn check(&self, addr: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.windows.entry(addr).or_insert_with(|| AttemptWindow {
            first_attempt: now,
            attempts: 0,
        });

        if now.duration_since(entry.first_attempt) >= self.config.window {
            entry.first_attempt = now;
            entry.attempts = 0;
        }

        entry.attempts += 1;
        if entry.attempts > self.config.max_attempts {
            let elapsed = now.duration_since(entry.first_attempt);
            Err(self.config.window.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }

    /// Drop windows that have fully elapsed. Called from the store's
    /// opportunistic sweep, not a timer.
    pub fn prune(&self) {
        let window = self.config.window;
        self.windows
            .retain(|_, state| state.first_attempt.elapsed() < window);
    }

    #[cfg(test)]
    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([203, 0, 113, last])
    }

    #[test_timeout::timeout]
    fn allows_up_to_the_cap_then_rejects_with_retry_hint() {
        let limiter = JoinRateLimiter::new(RateLimitConfig {
            max_attempts: 10,
            window: Duration::from_secs(60),
        });

        for _ in 0..10 {
            assert!(limiter.check(addr(1)).is_ok());
        }
        let retry_after = limiter.check(addr(1)).unwrap_err();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[test_timeout::timeout]
    fn windows_are_tracked_per_address() {
        let limiter = JoinRateLimiter::new(RateLimitConfig {
            max_attempts: 1,
            window: Duration::from_secs(60),
        });

        assert!(limiter.check(addr(1)).is_ok());
        assert!(limiter.check(addr(1)).is_err());
        // A different source is unaffected.
        assert!(limiter.check(addr(2)).is_ok());
    }

    #[test_timeout::timeout]
    fn counter_resets_once_the_window_fully_elapses() {
        let limiter = JoinRateLimiter::new(RateLimitConfig {
            max_attempts: 2,
            window: Duration::from_millis(40),
        });

        assert!(limiter.check(addr(7)).is_ok());
        assert!(limiter.check(addr(7)).is_ok());
        assert!(limiter.check(addr(7)).is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check(addr(7)).is_ok());
    }

    #[test_timeout::timeout]
    fn prune_drops_elapsed_windows() {
        let limiter = JoinRateLimiter::new(RateLimitConfig {
            max_attempts: 1,
            window: Duration::from_millis(20),
        });

        limiter.check(addr(3)).unwrap();
        assert_eq!(limiter.tracked_addresses(), 1);

        std::thread::sleep(Duration::from_millis(40));
        limiter.prune();
        assert_eq!(limiter.tracked_addresses(), 0);
    }
}
