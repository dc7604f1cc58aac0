use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::{error::AppError, middleware::rate_limit::client_ip};
use std::convert::Infallible;

use crate::{
    error::AuthError,
    services::{Caller, RequestContext},
    AppState,
};

pub const DEVICE_FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// Middleware to require a valid bearer token with a live session.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = request_context(req.headers(), req.extensions());
    let token = bearer_token(req.headers()).ok_or(AuthError::Unauthorized)?;

    let caller = state
        .auth
        .authenticate(token, Some(&context))
        .map_err(|e| {
            tracing::info!(reason = e.kind(), ip = %context.ip, "Bearer token rejected");
            e
        })?;

    req.extensions_mut().insert(caller);
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

/// Resolve a caller when a usable token is present; otherwise continue anonymously.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let context = request_context(req.headers(), req.extensions());

    let caller = bearer_token(req.headers()).and_then(|token| {
        state
            .auth
            .authenticate(token, Some(&context))
            .map_err(|e| tracing::debug!(reason = e.kind(), "Optional auth ignored token"))
            .ok()
    });

    if let Some(caller) = caller {
        req.extensions_mut().insert(caller);
    }
    req.extensions_mut().insert(context);

    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn request_context(headers: &HeaderMap, extensions: &Extensions) -> RequestContext {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    RequestContext {
        ip: client_ip(extensions)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        user_agent: header_value(header::USER_AGENT.as_str()).unwrap_or_default(),
        device_fingerprint: header_value(DEVICE_FINGERPRINT_HEADER).filter(|fp| !fp.is_empty()),
    }
}

/// Extractor for the caller resolved by [`auth_middleware`].
pub struct AuthUser(pub Caller);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or(AuthError::Unauthorized)?;

        Ok(AuthUser(caller))
    }
}

/// Caller if [`optional_auth_middleware`] resolved one.
pub struct MaybeAuthUser(pub Option<Caller>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<Caller>().cloned()))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| request_context(&parts.headers, &parts.extensions)))
    }
}
