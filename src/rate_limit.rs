//! Rate limiting primitives for the security gate.
//!
//! Two kinds of pressure are tracked per key (client IP or normalized
//! email): plain attempts (register, refresh, reset requests) and failed
//! credential checks. Login is gated on recorded failures so a caller who
//! burned the failure budget is rejected before credentials are even
//! looked at.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    Refresh,
    PasswordReset,
}

impl RateLimitAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Refresh => "refresh",
            Self::PasswordReset => "password_reset",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    /// Record an attempt and decide whether the caller is within budget.
    fn allow(&self, key: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    /// Record a failed credential check against the key.
    fn observe_failure(&self, key: Option<&str>, action: RateLimitAction);
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn allow(&self, _key: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn observe_failure(&self, _key: Option<&str>, _action: RateLimitAction) {}
}

/// Sliding-window in-memory limiter.
///
/// Timestamps per (action, key) are kept in a deque and pruned on access.
/// The map sits behind a single mutex; entries are touched for a few
/// microseconds, never across an await point.
pub struct MemoryRateLimiter {
    window: Duration,
    max_attempts: usize,
    max_failures: usize,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    failures: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_attempts: usize, max_failures: usize) -> Self {
        Self {
            window,
            max_attempts: max_attempts.max(1),
            max_failures: max_failures.max(1),
            attempts: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_key(key: &str, action: RateLimitAction) -> String {
        format!("{}:{key}", action.as_str())
    }

    fn prune(window: Duration, now: Instant, hits: &mut VecDeque<Instant>) {
        while hits.front().is_some_and(|hit| now.duration_since(*hit) > window) {
            hits.pop_front();
        }
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn allow(&self, key: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        let Some(key) = key else {
            return RateLimitDecision::Allowed;
        };
        let bucket = Self::bucket_key(key, action);
        let now = Instant::now();

        // Failures gate first: a caller over the failure budget stays
        // limited no matter how the attempt budget looks.
        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hits) = failures.get_mut(&bucket) {
                Self::prune(self.window, now, hits);
                if hits.len() >= self.max_failures {
                    return RateLimitDecision::Limited;
                }
            }
        }

        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let hits = attempts.entry(bucket).or_default();
        Self::prune(self.window, now, hits);
        if hits.len() >= self.max_attempts {
            return RateLimitDecision::Limited;
        }
        hits.push_back(now);
        RateLimitDecision::Allowed
    }

    fn observe_failure(&self, key: Option<&str>, action: RateLimitAction) {
        let Some(key) = key else {
            return;
        };
        let bucket = Self::bucket_key(key, action);
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let hits = failures.entry(bucket).or_default();
        Self::prune(self.window, now, hits);
        hits.push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.allow(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_key_is_allowed() {
        let limiter = MemoryRateLimiter::new(Duration::from_secs(60), 2, 2);
        for _ in 0..10 {
            assert_eq!(
                limiter.allow(None, RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn attempts_limit_within_window() {
        let limiter = MemoryRateLimiter::new(Duration::from_secs(60), 3, 100);
        for _ in 0..3 {
            assert_eq!(
                limiter.allow(Some("1.2.3.4"), RateLimitAction::Refresh),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.allow(Some("1.2.3.4"), RateLimitAction::Refresh),
            RateLimitDecision::Limited
        );
        // A different key is unaffected.
        assert_eq!(
            limiter.allow(Some("5.6.7.8"), RateLimitAction::Refresh),
            RateLimitDecision::Allowed
        );
    }

    // Three failed logins in the window lock the key out, even if the
    // fourth attempt would carry correct credentials.
    #[test]
    fn third_failure_locks_out_fourth_attempt() {
        let limiter = MemoryRateLimiter::new(Duration::from_secs(60), 100, 3);
        for _ in 0..3 {
            assert_eq!(
                limiter.allow(Some("alice@example.com"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
            limiter.observe_failure(Some("alice@example.com"), RateLimitAction::Login);
        }
        assert_eq!(
            limiter.allow(Some("alice@example.com"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn window_expiry_releases_the_limit() {
        let limiter = MemoryRateLimiter::new(Duration::from_millis(10), 100, 1);
        limiter.observe_failure(Some("alice@example.com"), RateLimitAction::Login);
        assert_eq!(
            limiter.allow(Some("alice@example.com"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            limiter.allow(Some("alice@example.com"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn actions_have_independent_buckets() {
        let limiter = MemoryRateLimiter::new(Duration::from_secs(60), 1, 100);
        assert_eq!(
            limiter.allow(Some("1.2.3.4"), RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.allow(Some("1.2.3.4"), RateLimitAction::Register),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.allow(Some("1.2.3.4"), RateLimitAction::Refresh),
            RateLimitDecision::Allowed
        );
    }
}
