//! Fixed-window login attempt limiter.
//!
//! A burst straddling a window boundary can pass up to twice `max_attempts` in a short
//! interval. That is accepted for login throttling.

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

use crate::models::LoginAttemptRecord;

#[derive(Clone, Default)]
pub struct LoginAttemptLimiter {
    records: Arc<DashMap<String, LoginAttemptRecord>>,
}

/// Login identifier: client IP plus the lower-cased email.
pub fn login_identifier(ip: &str, email: &str) -> String {
    format!("{}:{}", ip, email.trim().to_lowercase())
}

impl LoginAttemptLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempt. Denials neither increment nor extend the window.
    pub fn check_and_increment(
        &self,
        identifier: &str,
        max_attempts: u32,
        window: Duration,
    ) -> bool {
        self.check_and_increment_at(identifier, max_attempts, window, Utc::now())
    }

    pub fn check_and_increment_at(
        &self,
        identifier: &str,
        max_attempts: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.records.entry(identifier.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(LoginAttemptRecord::start(now, window));
                true
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_elapsed(now) {
                    *record = LoginAttemptRecord::start(now, window);
                    true
                } else if record.count < max_attempts {
                    record.count += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time until the identifier's current window resets, if one is running.
    pub fn retry_after(&self, identifier: &str) -> Option<Duration> {
        self.retry_after_at(identifier, Utc::now())
    }

    pub fn retry_after_at(&self, identifier: &str, now: DateTime<Utc>) -> Option<Duration> {
        let record = self.records.get(identifier)?;
        if record.is_elapsed(now) {
            None
        } else {
            Some(record.window_reset_at - now)
        }
    }

    pub fn reset(&self, identifier: &str) {
        self.records.remove(identifier);
    }

    /// Drop records whose window has elapsed. Returns how many were removed.
    pub fn prune_elapsed(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_elapsed(now));
        before.saturating_sub(self.records.len())
    }
}
