// ============================
// warden-lib/src/security/rate_limit.rs
// ============================
//! Sliding-window brute-force guard for authentication attempts.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use warden_common::{ExternalId, RateLimitPolicy};

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    /// Seconds until the next attempt will be allowed; 0 when allowed
    pub wait_seconds: u64,
}

impl RateLimitCheck {
    const ALLOWED: RateLimitCheck = RateLimitCheck {
        allowed: true,
        wait_seconds: 0,
    };
}

/// Rate limiter for authentication attempts, keyed by external identity.
///
/// Each identity keeps the timestamps of its failed attempts. Entries older
/// than the window are purged on every check before counting, and an
/// identity whose history becomes empty is dropped from the map.
#[derive(Debug, Clone)]
pub struct AuthRateLimiter {
    attempts: Arc<DashMap<ExternalId, VecDeque<DateTime<Utc>>>>,
    max_attempts: usize,
    window: Duration,
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::from_policy(&RateLimitPolicy::default())
    }
}

impl AuthRateLimiter {
    /// A limit of zero is raised to one; every identity gets at least one try.
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    pub fn from_policy(policy: &RateLimitPolicy) -> Self {
        Self::new(policy.max_attempts, policy.window())
    }

    /// Record a failed authentication attempt
    pub fn record_attempt(&self, id: ExternalId) {
        self.record_attempt_at(id, Utc::now());
    }

    pub fn record_attempt_at(&self, id: ExternalId, now: DateTime<Utc>) {
        self.attempts.entry(id).or_default().push_back(now);
    }

    /// Check whether `id` may attempt authentication now
    pub fn check_limit(&self, id: ExternalId) -> RateLimitCheck {
        self.check_limit_at(id, Utc::now())
    }

    pub fn check_limit_at(&self, id: ExternalId, now: DateTime<Utc>) -> RateLimitCheck {
        let cutoff = now - self.window;
        let mut empty = false;

        let check = match self.attempts.get_mut(&id) {
            Some(mut history) => {
                while history.front().is_some_and(|ts| *ts <= cutoff) {
                    history.pop_front();
                }
                empty = history.is_empty();

                if history.len() >= self.max_attempts {
                    self.lockout(&history, now)
                } else {
                    RateLimitCheck::ALLOWED
                }
            },
            None => RateLimitCheck::ALLOWED,
        };

        if empty {
            self.attempts.remove_if(&id, |_, history| history.is_empty());
        }
        check
    }

    /// Check and, when allowed, count the attempt in the same step.
    ///
    /// The shard guard is held from purge to push, so concurrent callers for
    /// one identity cannot all pass before any of them is counted. A
    /// successful login clears the reservation through [`Self::reset`].
    pub fn reserve(&self, id: ExternalId) -> RateLimitCheck {
        self.reserve_at(id, Utc::now())
    }

    pub fn reserve_at(&self, id: ExternalId, now: DateTime<Utc>) -> RateLimitCheck {
        let cutoff = now - self.window;
        let mut history = self.attempts.entry(id).or_default();
        while history.front().is_some_and(|ts| *ts <= cutoff) {
            history.pop_front();
        }
        if history.len() >= self.max_attempts {
            return self.lockout(&history, now);
        }
        history.push_back(now);
        RateLimitCheck::ALLOWED
    }

    fn lockout(&self, history: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> RateLimitCheck {
        // the lockout ends once enough of the oldest attempts age out
        let pivot = history[history.len() - self.max_attempts];
        let remaining = pivot + self.window - now;
        let wait_seconds = ((remaining.num_milliseconds() + 999) / 1000).max(1) as u64;
        RateLimitCheck {
            allowed: false,
            wait_seconds,
        }
    }

    /// Clear history after a successful authentication
    pub fn reset(&self, id: ExternalId) {
        self.attempts.remove(&id);
    }

    /// Drop every identity whose window has fully expired
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.window;
        let before = self.attempts.len();
        self.attempts.retain(|_, history| {
            history.retain(|ts| *ts > cutoff);
            !history.is_empty()
        });
        before - self.attempts.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.attempts.len()
    }
}
