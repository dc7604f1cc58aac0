//! Shared setup for cms-auth integration tests.
//!
//! Builds an `AppState` over the in-memory credential store with an HMAC config,
//! and small helpers for driving the router with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use cms_auth::{
    build_router,
    config::{
        AuthConfig, Environment, JwtConfig, RateLimitConfig, SecurityConfig, SessionConfig,
    },
    services::InMemoryCredentialStore,
    utils::Password,
    AppState,
};
use jsonwebtoken::Algorithm;
use secrecy::Secret;
use serde_json::{json, Value};
use axum::extract::ConnectInfo;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-signing-secret-0123456789";
/// Socket peer every test request arrives from.
pub const TEST_IP: &str = "203.0.113.5";
pub const PASSWORD: &str = "correct-horse-battery";
pub const ADMIN_EMAIL: &str = "root@example.com";
pub const ADMIN_PASSWORD: &str = "root-password-123";

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "cms-auth-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        jwt: JwtConfig {
            algorithm: Algorithm::HS256,
            secret: Some(Secret::new(TEST_SECRET.to_string())),
            refresh_secret: None,
            private_key_path: None,
            public_key_path: None,
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 3600,
            issuer: "cms-auth".to_string(),
            clock_skew_seconds: 30,
        },
        session: SessionConfig {
            retention_days: 7,
            sweep_interval_seconds: 3600,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trusted_proxies: Vec::new(),
        },
        bootstrap_admin: None,
    }
}

pub fn test_state_with(config: AuthConfig) -> AppState {
    AppState::new(config, Arc::new(InMemoryCredentialStore::new()), None)
        .expect("Failed to build test state")
}

pub fn test_state() -> AppState {
    test_state_with(test_config())
}

/// State plus a bootstrapped super_admin.
pub async fn test_state_with_admin() -> AppState {
    let state = test_state();
    state
        .auth
        .bootstrap_super_admin(ADMIN_EMAIL, &Password::new(ADMIN_PASSWORD))
        .await
        .expect("Failed to bootstrap admin");
    state
}

pub fn app(state: &AppState) -> Router {
    build_router(state.clone())
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    send_from(app, TEST_IP, None, method, uri, token, body).await
}

/// Send as socket peer `peer`, optionally carrying an `X-Forwarded-For` header.
pub async fn send_from(
    app: &Router,
    peer: &str,
    forwarded_for: Option<&str>,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, "integration-test");

    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    let mut request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let peer: SocketAddr = SocketAddr::new(peer.parse().unwrap(), 40_000);
    request.extensions_mut().insert(ConnectInfo(peer));

    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

pub async fn register(app: &Router, email: &str) -> Value {
    let response = send(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

/// Log in and return the token response body.
pub async fn login(app: &Router, email: &str, password: &str) -> Value {
    let response = send(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

pub fn access_token(tokens: &Value) -> String {
    tokens["access_token"].as_str().unwrap().to_string()
}

pub fn refresh_token(tokens: &Value) -> String {
    tokens["refresh_token"].as_str().unwrap().to_string()
}
