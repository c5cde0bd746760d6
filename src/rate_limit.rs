use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        let mut hits = self.store.entry(key.to_string()).or_default();
        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            hits.pop_front();
        }
        if hits.len() < limit {
            hits.push_back(now);
            true
        } else {
            false
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub signup_limit: usize,
    pub signup_window: Duration,
    pub review_limit: usize,
    pub review_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            signup_limit: usize_env("REVU_RL_SIGNUP_LIMIT", 5),
            signup_window: dur_env("REVU_RL_SIGNUP_WINDOW", 3600),
            review_limit: usize_env("REVU_RL_REVIEW_LIMIT", 10),
            review_window: dur_env("REVU_RL_REVIEW_WINDOW", 60),
            comment_limit: usize_env("REVU_RL_COMMENT_LIMIT", 30),
            comment_window: dur_env("REVU_RL_COMMENT_WINDOW", 60),
        }
    }
}

/// High level guard used by handlers, keyed per client address.
#[derive(Clone)]
pub struct RateLimiterFacade {
    limiter: InMemoryRateLimiter,
    cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }

    pub fn allow_signup(&self, ip: &str) -> bool {
        self.limiter
            .check(&format!("signup:{ip}"), self.cfg.signup_limit, self.cfg.signup_window)
    }

    pub fn allow_review(&self, ip: &str) -> bool {
        self.limiter
            .check(&format!("review:{ip}"), self.cfg.review_limit, self.cfg.review_window)
    }

    pub fn allow_comment(&self, ip: &str) -> bool {
        self.limiter.check(
            &format!("comment:{ip}"),
            self.cfg.comment_limit,
            self.cfg.comment_window,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new();
        let window = Duration::from_millis(50);
        for _ in 0..3 {
            assert!(rl.check("k", 3, window));
        }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn keys_are_independent() {
        let rl = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(rl.check("a", 1, window));
        assert!(!rl.check("a", 1, window));
        assert!(rl.check("b", 1, window));
    }
}
