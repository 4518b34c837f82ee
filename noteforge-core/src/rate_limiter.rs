//! Sliding-window request rate limiter (C7), applied before an agent
//! invocation in the note/ask/agent-task services.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Per-user sliding window over a fixed request count and window size,
/// grounded on the teacher's token-bucket limiter with the bucket
/// dimension narrowed to plain request count.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Prune timestamps older than the window, then admit the request if
    /// under `max_requests`, recording it in the same locked section.
    pub fn allow(&self, user_id: i64) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let entry = windows.entry(user_id).or_default();

        while let Some(&oldest) = entry.front() {
            if now.duration_since(oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() < self.max_requests {
            entry.push_back(now);
            RateDecision::Allowed
        } else {
            let retry_after = self
                .window
                .checked_sub(now.duration_since(*entry.front().unwrap()))
                .unwrap_or(Duration::ZERO);
            RateDecision::Denied { retry_after }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn admits_up_to_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.allow(1), RateDecision::Allowed);
        assert_eq!(limiter.allow(1), RateDecision::Allowed);
        assert!(matches!(limiter.allow(1), RateDecision::Denied { .. }));
    }

    #[test]
    fn users_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(limiter.allow(1), RateDecision::Allowed);
        assert_eq!(limiter.allow(2), RateDecision::Allowed);
    }

    #[test]
    fn boundary_admits_again_after_window_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert_eq!(limiter.allow(1), RateDecision::Allowed);
        assert!(matches!(limiter.allow(1), RateDecision::Denied { .. }));
        sleep(Duration::from_millis(25));
        assert_eq!(limiter.allow(1), RateDecision::Allowed);
    }

    #[test]
    fn denied_retry_after_is_bounded_by_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        limiter.allow(1);
        match limiter.allow(1) {
            RateDecision::Denied { retry_after } => assert!(retry_after <= Duration::from_secs(10)),
            RateDecision::Allowed => panic!("expected denial"),
        }
    }
}
