//! Session model - server-side record of one login instance.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const ACTIVITY_SESSION_CREATED: &str = "session_created";
pub const ACTIVITY_SESSION_REISSUED: &str = "session_reissued";
pub const ACTIVITY_SESSION_INVALIDATED: &str = "session_invalidated";
pub const ACTIVITY_VERSION_BUMPED: &str = "token_version_bumped";
pub const ACTIVITY_ORIGIN_CHANGED: &str = "origin_changed";

const MAX_RISK_SCORE: u8 = 100;

/// One entry of the append-only activity log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivity {
    pub at: DateTime<Utc>,
    pub action: String,
    pub ip: String,
    pub user_agent: String,
}

/// Session entity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub identity_id: String,
    pub token_version: u64,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub device_fingerprint: Option<String>,
    pub active: bool,
    pub risk_score: u8,
    pub mfa_verified: bool,
    pub activity: Vec<SessionActivity>,
    /// Refresh token ids already rotated at the current token version.
    #[serde(skip)]
    pub consumed_refresh_ids: HashSet<String>,
}

impl Session {
    pub fn new(
        identity_id: &str,
        ip: &str,
        user_agent: &str,
        device_fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.to_string(),
            token_version: 1,
            created_at: now,
            last_access_at: now,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            device_fingerprint: device_fingerprint.map(str::to_string),
            active: true,
            risk_score: 0,
            mfa_verified: false,
            activity: Vec::new(),
            consumed_refresh_ids: HashSet::new(),
        };
        session.log(ACTIVITY_SESSION_CREATED, ip, user_agent, now);
        session
    }

    pub fn log(&mut self, action: &str, ip: &str, user_agent: &str, at: DateTime<Utc>) {
        self.activity.push(SessionActivity {
            at,
            action: action.to_string(),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
        });
    }

    pub fn raise_risk(&mut self, amount: u8) {
        self.risk_score = self.risk_score.saturating_add(amount).min(MAX_RISK_SCORE);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_at = now;
    }

    /// Move to the next token version; refresh ids of the old version are dead anyway.
    pub fn advance_version(&mut self) {
        self.token_version += 1;
        self.consumed_refresh_ids.clear();
    }
}

/// Session summary for API responses (no activity log).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub risk_score: u8,
    pub is_current: bool,
}

impl SessionInfo {
    pub fn from_session(s: Session, current_session_id: Option<&str>) -> Self {
        let is_current = current_session_id == Some(s.id.as_str());
        Self {
            id: s.id,
            created_at: s.created_at,
            last_access_at: s.last_access_at,
            ip: s.ip,
            user_agent: s.user_agent,
            risk_score: s.risk_score,
            is_current,
        }
    }
}
