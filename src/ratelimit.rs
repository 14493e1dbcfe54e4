use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

/// Decision returned by [`RateLimiter::acquire`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquire {
    /// A send slot is available now; the timestamp has been consumed
    Ready,
    /// No slot available; wait roughly this long before retrying
    Wait { seconds: f64 },
}

impl Acquire {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Remaining capacity in both windows
#[derive(Debug, Clone, Copy)]
pub struct Tokens {
    pub hourly_remaining: u32,
    pub daily_remaining: u32,
}

struct Window {
    limit: u32,
    span: Duration,
    sends: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn new(limit: u32, span: Duration) -> Self {
        Self {
            limit,
            span,
            sends: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now
            - chrono::Duration::from_std(self.span).unwrap_or_else(|_| chrono::Duration::hours(1));
        while let Some(front) = self.sends.front() {
            if *front < cutoff {
                self.sends.pop_front();
            } else {
                break;
            }
        }
    }

    fn remaining(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.limit.saturating_sub(self.sends.len() as u32)
    }

    /// Force the window to report exactly `remaining` free slots,
    /// trusting the platform over local bookkeeping. Synthetic entries
    /// expire at `reset_at` so capacity returns when the platform says
    /// it does.
    fn sync_remaining(&mut self, remaining: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.prune(now);
        let target_used = self.limit.saturating_sub(remaining.min(self.limit)) as usize;
        while self.sends.len() > target_used {
            self.sends.pop_front();
        }
        if self.sends.len() < target_used {
            let span = chrono::Duration::from_std(self.span)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            let synthetic = reset_at - span;
            while self.sends.len() < target_used {
                self.sends.push_back(synthetic);
            }
            self.sends.make_contiguous().sort_unstable();
        }
    }

    /// Seconds until the oldest tracked send falls out of the window
    fn seconds_until_slot(&mut self, now: DateTime<Utc>) -> f64 {
        self.prune(now);
        if (self.sends.len() as u32) < self.limit {
            return 0.0;
        }
        match self.sends.front() {
            Some(oldest) => {
                let expires = *oldest
                    + chrono::Duration::from_std(self.span)
                        .unwrap_or_else(|_| chrono::Duration::hours(1));
                (expires - now).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        }
    }
}

struct LimiterState {
    hourly: Window,
    daily: Window,
    /// Hard override from platform response headers, if one is active
    override_until: Option<DateTime<Utc>>,
}

/// Sliding-window rate limiter over two spans (per-hour and per-day).
/// Every successful acquire consumes one timestamp in both windows, so
/// capacity is conserved: N acquires consume exactly N slots.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(per_hour: u32, per_day: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                hourly: Window::new(per_hour, Duration::from_secs(3600)),
                daily: Window::new(per_day, Duration::from_secs(86400)),
                override_until: None,
            }),
        }
    }

    /// Try to consume a send slot. On success the slot is consumed
    /// immediately; on refusal a suggested wait (with jitter) is returned
    /// and nothing is consumed.
    pub fn acquire(&self) -> Acquire {
        self.acquire_at(Utc::now())
    }

    /// Deterministic-clock variant used by the timing logic and tests
    pub fn acquire_at(&self, now: DateTime<Utc>) -> Acquire {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(until) = state.override_until {
            if now < until {
                let seconds = (until - now).num_milliseconds().max(0) as f64 / 1000.0;
                return Acquire::Wait {
                    seconds: Self::jitter(seconds),
                };
            }
            state.override_until = None;
        }

        let hourly_wait = state.hourly.seconds_until_slot(now);
        let daily_wait = state.daily.seconds_until_slot(now);
        let wait = hourly_wait.max(daily_wait);

        if wait > 0.0 {
            debug!(wait_seconds = wait, "rate limit window full");
            return Acquire::Wait {
                seconds: Self::jitter(wait),
            };
        }

        state.hourly.sends.push_back(now);
        state.daily.sends.push_back(now);
        Acquire::Ready
    }

    /// Remaining capacity without consuming anything
    pub fn tokens(&self) -> Tokens {
        self.tokens_at(Utc::now())
    }

    pub fn tokens_at(&self, now: DateTime<Utc>) -> Tokens {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Tokens {
            hourly_remaining: state.hourly.remaining(now),
            daily_remaining: state.daily.remaining(now),
        }
    }

    /// Apply a platform-reported limit. The reported remaining/reset pair
    /// always wins over local bookkeeping: the hourly window is resynced
    /// to it on every call, and zero remaining additionally hard-blocks
    /// until the reset time.
    pub fn update_from_headers(&self, remaining: u32, reset_at: DateTime<Utc>) {
        self.update_from_headers_at(remaining, reset_at, Utc::now());
    }

    pub fn update_from_headers_at(&self, remaining: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if remaining == 0 {
            warn!(%reset_at, "platform reports rate limit exhausted");
            state.override_until = Some(reset_at);
        } else {
            state.override_until = None;
        }
        state.hourly.sync_remaining(remaining, reset_at, now);
    }

    /// +/-20% jitter so concurrent senders don't wake in lockstep
    fn jitter(seconds: f64) -> f64 {
        let factor = rand::thread_rng().gen_range(0.8..1.2);
        (seconds * factor).max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn test_acquire_consumes_slots() {
        let limiter = RateLimiter::new(3, 10);
        let now = t0();

        assert!(limiter.acquire_at(now).is_ready());
        assert!(limiter.acquire_at(now).is_ready());
        assert!(limiter.acquire_at(now).is_ready());
        assert!(!limiter.acquire_at(now).is_ready());

        let tokens = limiter.tokens_at(now);
        assert_eq!(tokens.hourly_remaining, 0);
        assert_eq!(tokens.daily_remaining, 7);
    }

    #[test]
    fn test_slot_frees_after_window() {
        let limiter = RateLimiter::new(1, 10);
        let now = t0();

        assert!(limiter.acquire_at(now).is_ready());
        assert!(!limiter.acquire_at(now + chrono::Duration::minutes(30)).is_ready());
        assert!(limiter
            .acquire_at(now + chrono::Duration::minutes(61))
            .is_ready());
    }

    #[test]
    fn test_daily_window_binds_independently() {
        let limiter = RateLimiter::new(5, 2);
        let now = t0();

        assert!(limiter.acquire_at(now).is_ready());
        assert!(limiter.acquire_at(now).is_ready());
        // Hourly has room but daily is exhausted
        match limiter.acquire_at(now + chrono::Duration::hours(2)) {
            Acquire::Wait { seconds } => assert!(seconds > 0.0),
            Acquire::Ready => panic!("daily window should refuse"),
        }
    }

    #[test]
    fn test_header_override_blocks_until_reset() {
        let limiter = RateLimiter::new(5, 10);
        let now = t0();
        let reset = now + chrono::Duration::minutes(15);

        limiter.update_from_headers(0, reset);
        assert!(!limiter.acquire_at(now).is_ready());
        assert!(limiter.acquire_at(reset + chrono::Duration::seconds(1)).is_ready());
    }

    #[test]
    fn test_header_sync_overrides_local_window() {
        let limiter = RateLimiter::new(5, 50);
        let now = t0();
        let reset = now + chrono::Duration::minutes(10);

        // Platform says one slot left even though nothing was consumed locally
        limiter.update_from_headers_at(1, reset, now);
        assert_eq!(limiter.tokens_at(now).hourly_remaining, 1);
        assert!(limiter.acquire_at(now).is_ready());
        match limiter.acquire_at(now) {
            Acquire::Wait { seconds } => assert!(seconds > 0.0 && seconds < 721.0),
            Acquire::Ready => panic!("platform budget was spent"),
        }

        // Capacity returns at the platform's reset time, not a full window later
        assert!(limiter.acquire_at(reset + chrono::Duration::seconds(1)).is_ready());

        // The platform can also grant more than local tracking believes
        limiter.update_from_headers_at(5, reset, now);
        assert_eq!(limiter.tokens_at(now).hourly_remaining, 5);
    }

    #[test]
    fn test_refused_acquire_consumes_nothing() {
        let limiter = RateLimiter::new(1, 1);
        let now = t0();

        assert!(limiter.acquire_at(now).is_ready());
        for _ in 0..5 {
            assert!(!limiter.acquire_at(now).is_ready());
        }
        // Still exactly one consumed slot in each window
        let tokens = limiter.tokens_at(now);
        assert_eq!(tokens.hourly_remaining, 0);
        assert_eq!(tokens.daily_remaining, 0);
    }
}
