//! Attempt counting per key with temporary blocking.
//!
//! Each concern (manual sync, history export) owns its own limiter so one
//! cannot exhaust the other's budget.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::shared::config::RateLimitPolicy;
use crate::shared::error::{Result, SyncError};

#[derive(Debug, Clone)]
struct Entry {
    attempts: u32,
    first_attempt: Instant,
    blocked_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub attempts: u32,
    pub remaining_attempts: u32,
    pub blocked: bool,
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    policy: RateLimitPolicy,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: RateLimitPolicy) -> Self {
        Self {
            name,
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `key` may make another attempt
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(key) else {
            return RateLimitDecision {
                allowed: true,
                remaining_attempts: self.policy.max_attempts,
                retry_after: None,
            };
        };

        if let Some(until) = entry.blocked_until.filter(|until| *until > now) {
            return RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                retry_after: Some(until - now),
            };
        }

        if now.duration_since(entry.first_attempt) > self.policy.window {
            entries.remove(key);
            return RateLimitDecision {
                allowed: true,
                remaining_attempts: self.policy.max_attempts,
                retry_after: None,
            };
        }

        if entry.attempts >= self.policy.max_attempts {
            entry.blocked_until = Some(now + self.policy.block_duration);
            return RateLimitDecision {
                allowed: false,
                remaining_attempts: 0,
                retry_after: Some(self.policy.block_duration),
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining_attempts: self.policy.max_attempts - entry.attempts,
            retry_after: None,
        }
    }

    pub async fn record_attempt(&self, key: &str) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            attempts: 0,
            first_attempt: now,
            blocked_until: None,
        });
        entry.attempts += 1;
        if entry.attempts >= self.policy.max_attempts {
            tracing::warn!("[RateLimit] {} blocked for {:?} ({})", key, self.policy.block_duration, self.name);
            entry.blocked_until = Some(now + self.policy.block_duration);
        }
    }

    /// Check and record in one step
    pub async fn acquire(&self, key: &str) -> Result<()> {
        let decision = self.check(key).await;
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or(self.policy.block_duration);
            return Err(SyncError::RateLimited {
                retry_after_secs: retry_after.as_secs_f64().ceil() as u64,
            });
        }
        self.record_attempt(key).await;
        Ok(())
    }

    pub async fn reset(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn status(&self, key: &str) -> RateLimitStatus {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => RateLimitStatus {
                attempts: 0,
                remaining_attempts: self.policy.max_attempts,
                blocked: false,
                retry_after: None,
            },
            Some(entry) => {
                let retry_after = entry
                    .blocked_until
                    .filter(|until| *until > now)
                    .map(|until| until - now);
                RateLimitStatus {
                    attempts: entry.attempts,
                    remaining_attempts: self.policy.max_attempts.saturating_sub(entry.attempts),
                    blocked: retry_after.is_some(),
                    retry_after,
                }
            }
        }
    }

    /// Forget expired, unblocked keys
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            let expired = now.duration_since(entry.first_attempt) > self.policy.window;
            let blocked = entry.blocked_until.map_or(false, |until| until > now);
            !expired || blocked
        });
        before - entries.len()
    }
}
