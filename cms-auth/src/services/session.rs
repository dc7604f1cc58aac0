//! Process-local session registry.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::AuthError;
use crate::models::session::{
    ACTIVITY_ORIGIN_CHANGED, ACTIVITY_SESSION_INVALIDATED, ACTIVITY_SESSION_REISSUED,
    ACTIVITY_VERSION_BUMPED,
};
use crate::models::Session;
use crate::services::LoginAttemptLimiter;

const IP_CHANGE_RISK: u8 = 25;
const USER_AGENT_CHANGE_RISK: u8 = 15;
const HIGH_RISK_THRESHOLD: u8 = 75;

/// Keyed store of sessions. Every read-modify-write runs under the entry's shard lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for a successful login.
    ///
    /// When the identity already owns a session with the same device fingerprint, that
    /// session id is re-established at the next token version instead of minting a new one.
    pub fn create(
        &self,
        identity_id: &str,
        ip: &str,
        user_agent: &str,
        device_fingerprint: Option<&str>,
    ) -> Session {
        let now = Utc::now();

        if let Some(fingerprint) = device_fingerprint {
            let existing = self
                .sessions
                .iter()
                .find(|entry| {
                    entry.identity_id == identity_id
                        && entry.device_fingerprint.as_deref() == Some(fingerprint)
                })
                .map(|entry| entry.key().clone());

            if let Some(session_id) = existing {
                if let Some(mut session) = self.sessions.get_mut(&session_id) {
                    let was_active = session.active;
                    session.advance_version();
                    session.active = true;
                    session.created_at = now;
                    session.last_access_at = now;
                    session.ip = ip.to_string();
                    session.user_agent = user_agent.to_string();
                    session.log(ACTIVITY_SESSION_REISSUED, ip, user_agent, now);

                    if !was_active {
                        metrics::gauge!("auth_sessions_active").increment(1.0);
                    }
                    tracing::info!(
                        identity_id = %identity_id,
                        session_id = %session.id,
                        token_version = session.token_version,
                        "Session re-established"
                    );
                    return session.clone();
                }
            }
        }

        let session = Session::new(identity_id, ip, user_agent, device_fingerprint, now);
        self.sessions.insert(session.id.clone(), session.clone());
        metrics::gauge!("auth_sessions_active").increment(1.0);

        tracing::info!(
            identity_id = %identity_id,
            session_id = %session.id,
            "Session created"
        );
        session
    }

    /// Active session by id, touching last-access-at. Unknown and inactive ids are both `None`.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut session = self.sessions.get_mut(session_id)?;
        if !session.active {
            return None;
        }
        session.touch(Utc::now());
        Some(session.clone())
    }

    /// Check that a session is active and, when given, still at `token_version`.
    ///
    /// Inactivity is reported before any version comparison.
    pub fn verify(&self, session_id: &str, token_version: Option<u64>) -> Result<Session, AuthError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AuthError::SessionExpired)?;

        check_live(&session, token_version)?;
        session.touch(Utc::now());
        Ok(session.clone())
    }

    /// [`verify`](Self::verify) plus single use of a refresh token id.
    ///
    /// A refresh id already rotated against this session version fails with
    /// `TokenInvalidated`. The check and the record happen under one entry lock.
    pub fn consume_refresh(
        &self,
        session_id: &str,
        token_version: u64,
        refresh_id: &str,
    ) -> Result<Session, AuthError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(AuthError::SessionExpired)?;

        check_live(&session, Some(token_version))?;

        if !session.consumed_refresh_ids.insert(refresh_id.to_string()) {
            tracing::warn!(
                session_id = %session_id,
                identity_id = %session.identity_id,
                "Refresh token replayed"
            );
            return Err(AuthError::TokenInvalidated);
        }

        session.touch(Utc::now());
        Ok(session.clone())
    }

    /// Deactivate one session. Returns whether the id was known.
    pub fn invalidate(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                deactivate(&mut session, Utc::now());
                true
            }
            None => false,
        }
    }

    /// Deactivate every active session of an identity. Returns how many were active.
    pub fn invalidate_all_for_identity(&self, identity_id: &str) -> usize {
        let now = Utc::now();
        let count = self
            .sessions
            .iter_mut()
            .filter(|entry| entry.identity_id == identity_id)
            .map(|mut entry| deactivate(&mut entry, now))
            .filter(|flipped| *flipped)
            .count();

        tracing::info!(identity_id = %identity_id, count, "Sessions invalidated for identity");
        count
    }

    /// Increment a session's token version in place, leaving it active.
    pub fn bump_version(&self, session_id: &str) -> Option<u64> {
        let mut session = self.sessions.get_mut(session_id)?;
        let now = Utc::now();
        session.advance_version();
        let (ip, user_agent) = (session.ip.clone(), session.user_agent.clone());
        session.log(ACTIVITY_VERSION_BUMPED, &ip, &user_agent, now);
        Some(session.token_version)
    }

    /// Record the origin of an authenticated request and score changes against the session.
    pub fn observe(&self, session_id: &str, ip: &str, user_agent: &str) -> Option<u8> {
        let mut session = self.sessions.get_mut(session_id)?;
        let ip_changed = !ip.is_empty() && session.ip != ip;
        let agent_changed = !user_agent.is_empty() && session.user_agent != user_agent;

        if ip_changed || agent_changed {
            if ip_changed {
                session.raise_risk(IP_CHANGE_RISK);
            }
            if agent_changed {
                session.raise_risk(USER_AGENT_CHANGE_RISK);
            }
            session.log(ACTIVITY_ORIGIN_CHANGED, ip, user_agent, Utc::now());

            if session.risk_score >= HIGH_RISK_THRESHOLD {
                tracing::warn!(
                    session_id = %session_id,
                    identity_id = %session.identity_id,
                    risk_score = session.risk_score,
                    "High-risk session activity"
                );
            }
        }

        Some(session.risk_score)
    }

    /// Active sessions of an identity, newest first.
    pub fn list_for_identity(&self, identity_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.identity_id == identity_id && entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.active).count()
    }

    /// Delete sessions created before `now - retention`, active or not.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        self.sweep_expired_at(retention, Utc::now())
    }

    pub fn sweep_expired_at(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let mut removed = 0;
        let mut removed_active = 0;

        self.sessions.retain(|_, session| {
            if session.created_at < cutoff {
                removed += 1;
                if session.active {
                    removed_active += 1;
                }
                false
            } else {
                true
            }
        });

        if removed_active > 0 {
            metrics::gauge!("auth_sessions_active").decrement(removed_active as f64);
        }
        removed
    }
}

/// Inactivity is reported before any version comparison.
fn check_live(session: &Session, token_version: Option<u64>) -> Result<(), AuthError> {
    if !session.active {
        return Err(AuthError::SessionExpired);
    }

    if let Some(version) = token_version {
        if version != session.token_version {
            tracing::warn!(
                session_id = %session.id,
                presented = version,
                current = session.token_version,
                "Stale token version presented"
            );
            return Err(AuthError::TokenInvalidated);
        }
    }

    Ok(())
}

/// Flip a session inactive. Returns whether it was active before.
fn deactivate(session: &mut Session, now: DateTime<Utc>) -> bool {
    if !session.active {
        return false;
    }
    session.active = false;
    let (ip, user_agent) = (session.ip.clone(), session.user_agent.clone());
    session.log(ACTIVITY_SESSION_INVALIDATED, &ip, &user_agent, now);

    metrics::counter!("auth_sessions_invalidated_total").increment(1);
    metrics::gauge!("auth_sessions_active").decrement(1.0);
    true
}

/// Periodically drop sessions past retention and elapsed login-attempt windows.
pub fn spawn_session_sweeper(
    sessions: SessionRegistry,
    limiter: LoginAttemptLimiter,
    retention: Duration,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let swept = sessions.sweep_expired(retention);
            let pruned = limiter.prune_elapsed();
            tracing::debug!(swept, pruned, "Session sweep completed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_starts_at_version_one() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);

        assert_eq!(session.token_version, 1);
        assert_eq!(session.risk_score, 0);
        assert!(session.active);
        assert_eq!(session.activity[0].action, "session_created");
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_get_after_invalidate_is_none() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);

        assert!(registry.get(&session.id).is_some());
        assert!(registry.invalidate(&session.id));
        assert!(registry.get(&session.id).is_none());

        // Idempotent
        assert!(registry.invalidate(&session.id));
        assert!(!registry.invalidate("unknown"));
    }

    #[test]
    fn test_get_touches_last_access() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let touched = registry.get(&session.id).unwrap();
        assert!(touched.last_access_at > session.last_access_at);
    }

    #[test]
    fn test_invalidate_all_counts_active_sessions() {
        let registry = SessionRegistry::new();
        let ids: Vec<String> = (0..3)
            .map(|_| registry.create("u1", "203.0.113.5", "curl/8", None).id)
            .collect();
        let other = registry.create("u2", "203.0.113.9", "curl/8", None);

        assert_eq!(registry.invalidate_all_for_identity("u1"), 3);
        for id in &ids {
            assert!(registry.get(id).is_none());
        }
        assert!(registry.get(&other.id).is_some());
        assert_eq!(registry.invalidate_all_for_identity("u1"), 0);
    }

    #[test]
    fn test_verify_distinguishes_inactive_from_stale() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", Some("laptop"));

        assert!(registry.verify(&session.id, Some(1)).is_ok());
        assert!(matches!(
            registry.verify(&session.id, Some(2)),
            Err(AuthError::TokenInvalidated)
        ));

        registry.invalidate(&session.id);
        assert!(matches!(
            registry.verify(&session.id, Some(1)),
            Err(AuthError::SessionExpired)
        ));
        assert!(matches!(
            registry.verify("missing", None),
            Err(AuthError::SessionExpired)
        ));
    }

    #[test]
    fn test_relogin_with_same_fingerprint_bumps_version() {
        let registry = SessionRegistry::new();
        let first = registry.create("u1", "203.0.113.5", "curl/8", Some("laptop"));
        registry.invalidate_all_for_identity("u1");

        let second = registry.create("u1", "203.0.113.5", "curl/8", Some("laptop"));
        assert_eq!(second.id, first.id);
        assert_eq!(second.token_version, 2);
        assert!(second.active);
        assert!(matches!(
            registry.verify(&first.id, Some(1)),
            Err(AuthError::TokenInvalidated)
        ));

        let other_device = registry.create("u1", "203.0.113.5", "curl/8", Some("phone"));
        assert_ne!(other_device.id, first.id);
        assert_eq!(other_device.token_version, 1);
    }

    #[test]
    fn test_bump_version_only_increases() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);

        assert_eq!(registry.bump_version(&session.id), Some(2));
        assert_eq!(registry.bump_version(&session.id), Some(3));
        assert!(registry.get(&session.id).is_some());
        assert_eq!(registry.bump_version("missing"), None);
    }

    #[test]
    fn test_observe_scores_origin_changes() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);

        assert_eq!(registry.observe(&session.id, "203.0.113.5", "curl/8"), Some(0));
        assert_eq!(registry.observe(&session.id, "198.51.100.7", "curl/8"), Some(25));
        assert_eq!(registry.observe(&session.id, "198.51.100.7", "firefox"), Some(65));
        for _ in 0..5 {
            registry.observe(&session.id, "192.0.2.1", "safari");
        }
        assert_eq!(registry.observe(&session.id, "192.0.2.2", "edge"), Some(100));
    }

    #[test]
    fn test_sweep_removes_by_absolute_age() {
        let registry = SessionRegistry::new();
        let old = registry.create("u1", "203.0.113.5", "curl/8", None);
        let fresh = registry.create("u1", "203.0.113.5", "curl/8", None);
        registry.invalidate(&fresh.id);

        let later = Utc::now() + Duration::days(3);
        assert_eq!(registry.sweep_expired_at(Duration::days(7), later), 0);

        // Touching does not extend retention.
        registry.get(&old.id);
        let much_later = Utc::now() + Duration::days(8);
        assert_eq!(registry.sweep_expired_at(Duration::days(7), much_later), 2);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_list_for_identity_excludes_inactive() {
        let registry = SessionRegistry::new();
        let a = registry.create("u1", "203.0.113.5", "curl/8", None);
        let b = registry.create("u1", "203.0.113.5", "curl/8", None);
        registry.invalidate(&a.id);

        let listed = registry.list_for_identity("u1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, b.id);
    }

    #[test]
    fn test_refresh_id_is_consumed_once() {
        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", Some("laptop"));

        assert!(registry.consume_refresh(&session.id, 1, "r1").is_ok());
        assert!(matches!(
            registry.consume_refresh(&session.id, 1, "r1"),
            Err(AuthError::TokenInvalidated)
        ));
        assert!(registry.consume_refresh(&session.id, 1, "r2").is_ok());
        assert!(matches!(
            registry.consume_refresh(&session.id, 0, "r3"),
            Err(AuthError::TokenInvalidated)
        ));

        // A new version starts with a clean slate.
        assert_eq!(registry.bump_version(&session.id), Some(2));
        assert!(registry.consume_refresh(&session.id, 2, "r1").is_ok());

        registry.invalidate(&session.id);
        assert!(matches!(
            registry.consume_refresh(&session.id, 2, "r4"),
            Err(AuthError::SessionExpired)
        ));
    }

    #[test]
    fn test_concurrent_get_and_invalidate_is_consistent() {
        use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
        use std::sync::Barrier;

        let registry = SessionRegistry::new();
        let session = registry.create("u1", "203.0.113.5", "curl/8", None);

        // Logical clock shared by all threads: every `get` and the invalidation take a tick.
        let clock = AtomicU64::new(0);
        let invalidated_at = AtomicU64::new(u64::MAX);
        let seen_active = AtomicBool::new(false);
        let barrier = Barrier::new(5);

        let observations: Vec<(u64, bool)> = std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let mut seen = Vec::new();
                        loop {
                            let started = clock.fetch_add(1, SeqCst);
                            let result = registry.get(&session.id);
                            if let Some(found) = &result {
                                assert!(found.active);
                                seen_active.store(true, SeqCst);
                            }
                            seen.push((started, result.is_some()));
                            if started > invalidated_at.load(SeqCst) {
                                return seen;
                            }
                        }
                    })
                })
                .collect();

            barrier.wait();
            while !seen_active.load(SeqCst) {
                std::thread::yield_now();
            }
            let was_active = registry.invalidate(&session.id);
            invalidated_at.store(clock.fetch_add(1, SeqCst), SeqCst);
            assert!(was_active);

            readers
                .into_iter()
                .flat_map(|reader| reader.join().unwrap())
                .collect()
        });

        let invalidated_at = invalidated_at.load(SeqCst);
        assert!(observations.iter().any(|(_, found)| *found));
        for (started, found) in observations {
            if started > invalidated_at {
                assert!(!found, "get at tick {} saw an invalidated session", started);
            }
        }
        assert!(registry.get(&session.id).is_none());
    }
}
