use chrono::{DateTime, Utc};

/// Fixed-window counter for one login identifier. Overwritten once its window elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl LoginAttemptRecord {
    pub fn start(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            window_reset_at: now + window,
        }
    }

    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }
}
