use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::session::Session;

/// Failed-attempt counter for one identifier, kept in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub attempts: u32,
    pub last_attempt: i64,
    pub locked_until: i64,
}

/// Session key for an identifier; the raw username or email never lands in session storage.
pub fn rate_limit_key(identifier: &str) -> String {
    format!("rate_limit_{}", hex::encode(Sha256::digest(identifier.as_bytes())))
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    pub max_attempts: u32,
    pub lockout_secs: i64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self { max_attempts: 5, lockout_secs: 900 }
    }
}

impl RateLimiter {
    pub fn new(max_attempts: u32, lockout_secs: i64) -> Self {
        Self { max_attempts, lockout_secs }
    }

    pub fn check_rate_limit(&self, session: &mut Session, identifier: &str) -> bool {
        self.check_rate_limit_at(session, identifier, Utc::now().timestamp())
    }

    /// Deny while locked; a quiet period longer than the lockout resets the counter.
    pub fn check_rate_limit_at(&self, session: &mut Session, identifier: &str, now: i64) -> bool {
        let key = rate_limit_key(identifier);
        let Some(entry) = session.rate_limits().get(&key).copied() else {
            return true;
        };

        if entry.locked_until > now {
            return false;
        }

        if entry.last_attempt + self.lockout_secs < now {
            session.rate_limits_mut().insert(key, RateLimitEntry::default());
            return true;
        }

        entry.attempts < self.max_attempts
    }

    pub fn record_failed_attempt(&self, session: &mut Session, identifier: &str) {
        self.record_failed_attempt_at(session, identifier, Utc::now().timestamp());
    }

    pub fn record_failed_attempt_at(&self, session: &mut Session, identifier: &str, now: i64) {
        let max_attempts = self.max_attempts;
        let lockout_secs = self.lockout_secs;
        let entry = session.rate_limits_mut().entry(rate_limit_key(identifier)).or_default();
        entry.attempts += 1;
        entry.last_attempt = now;
        if entry.attempts >= max_attempts {
            entry.locked_until = now + lockout_secs;
            tracing::info!("Login throttled for {} seconds after {} failed attempts", lockout_secs, entry.attempts);
        }
    }

    pub fn clear_rate_limit(&self, session: &mut Session, identifier: &str) {
        session.rate_limits_mut().remove(&rate_limit_key(identifier));
    }
}
