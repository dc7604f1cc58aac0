mod common;

use cms_auth::{
    error::AuthError,
    models::{Identity, Role},
    services::{SessionRegistry, TokenService},
};
use common::test_config;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Barrier;
use std::time::{Duration, Instant};

fn editor_u1() -> Identity {
    let mut identity = Identity::new("u1@example.com", Role::Editor, None);
    identity.id = "u1".to_string();
    identity.permissions = vec!["pages.update".to_string()];
    identity
}

fn token_service() -> TokenService {
    let config = test_config();
    TokenService::new(&config.jwt, config.environment).unwrap()
}

/// Verify an access token and cross-check its session the way request authentication does.
fn verify_with_session(
    tokens: &TokenService,
    sessions: &SessionRegistry,
    token: &str,
) -> Result<(), AuthError> {
    let claims = tokens.verify_access_token(token)?;
    if let Some(session_id) = claims.session_id.as_deref() {
        sessions.verify(session_id, claims.token_version)?;
    }
    Ok(())
}

#[test]
fn test_invalidated_session_without_reissue_is_session_expired() {
    let tokens = token_service();
    let sessions = SessionRegistry::new();
    let identity = editor_u1();

    let session = sessions.create("u1", "203.0.113.5", "editor-app", None);
    let token = tokens
        .issue_access_token(&identity, Some(&session.id), Some(1))
        .unwrap();
    assert!(verify_with_session(&tokens, &sessions, &token).is_ok());

    assert_eq!(sessions.invalidate_all_for_identity("u1"), 1);
    assert!(matches!(
        verify_with_session(&tokens, &sessions, &token),
        Err(AuthError::SessionExpired)
    ));
}

#[test]
fn test_reissued_session_rejects_old_version_as_invalidated() {
    let tokens = token_service();
    let sessions = SessionRegistry::new();
    let identity = editor_u1();

    let session = sessions.create("u1", "203.0.113.5", "editor-app", Some("laptop-1"));
    let old_token = tokens
        .issue_access_token(&identity, Some(&session.id), Some(session.token_version))
        .unwrap();

    sessions.invalidate_all_for_identity("u1");

    // Next login from the same device re-establishes the session at version 2.
    let reissued = sessions.create("u1", "203.0.113.5", "editor-app", Some("laptop-1"));
    assert_eq!(reissued.id, session.id);
    assert_eq!(reissued.token_version, 2);

    assert!(matches!(
        verify_with_session(&tokens, &sessions, &old_token),
        Err(AuthError::TokenInvalidated)
    ));

    let new_token = tokens
        .issue_access_token(&identity, Some(&reissued.id), Some(reissued.token_version))
        .unwrap();
    assert!(verify_with_session(&tokens, &sessions, &new_token).is_ok());
}

#[test]
fn test_refresh_after_invalidation_never_succeeds() {
    let tokens = token_service();
    let sessions = SessionRegistry::new();
    let identity = editor_u1();

    let session = sessions.create("u1", "203.0.113.5", "editor-app", None);
    let refresh = tokens
        .issue_refresh_token(&identity, &session.id, session.token_version)
        .unwrap();
    let claims = tokens.verify_refresh_token(&refresh).unwrap();

    sessions.invalidate(&session.id);

    assert!(matches!(
        tokens.rotate_token_pair(&claims, &identity, &sessions),
        Err(AuthError::TokenInvalidated)
    ));
}

#[test]
fn test_concurrent_refresh_and_invalidation() {
    let tokens = token_service();
    let sessions = SessionRegistry::new();
    let identity = editor_u1();
    let session = sessions.create("u1", "203.0.113.5", "editor-app", None);

    // Logical clock: each rotation attempt takes a tick before it starts, the
    // invalidation takes one after it returns.
    let clock = AtomicU64::new(0);
    let invalidated_at = AtomicU64::new(u64::MAX);
    let rotated = AtomicU64::new(0);
    let barrier = Barrier::new(5);

    let attempts: Vec<(u64, bool)> = std::thread::scope(|scope| {
        let rotators: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let mut attempts = Vec::new();
                    loop {
                        let refresh = tokens
                            .issue_refresh_token(&identity, &session.id, session.token_version)
                            .unwrap();
                        let claims = tokens.verify_refresh_token(&refresh).unwrap();

                        let started = clock.fetch_add(1, SeqCst);
                        let ok = tokens.rotate_token_pair(&claims, &identity, &sessions).is_ok();
                        if ok {
                            rotated.fetch_add(1, SeqCst);
                        }
                        attempts.push((started, ok));

                        if started > invalidated_at.load(SeqCst) {
                            return attempts;
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        let deadline = Instant::now() + Duration::from_secs(5);
        while rotated.load(SeqCst) < 8 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        let was_active = sessions.invalidate(&session.id);
        invalidated_at.store(clock.fetch_add(1, SeqCst), SeqCst);
        assert!(was_active);

        rotators
            .into_iter()
            .flat_map(|rotator| rotator.join().unwrap())
            .collect()
    });

    let invalidated_at = invalidated_at.load(SeqCst);
    assert!(attempts.iter().any(|(_, ok)| *ok));
    assert!(attempts.iter().any(|(started, _)| *started > invalidated_at));
    for (started, ok) in attempts {
        if ok {
            assert!(
                started < invalidated_at,
                "rotation started at tick {} succeeded after invalidation at tick {}",
                started,
                invalidated_at
            );
        }
    }
}
