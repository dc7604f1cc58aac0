use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        LoginRequest, LogoutAllResponse, LogoutResponse, RefreshRequest, RegisterRequest,
        RegisterResponse, SessionListResponse, StatusResponse,
    },
    middleware::{AuthUser, MaybeAuthUser},
    services::RequestContext,
    utils::ValidatedJson,
    AppState,
};

/// Register a new identity (role viewer)
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state.auth.register(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: identity.id,
            email: identity.email,
            role: identity.role.to_string(),
        }),
    ))
}

/// Login with email and password
pub async fn login(
    State(state): State<AppState>,
    context: RequestContext,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.auth.login(req, &context).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Exchange a refresh token for a new token pair
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// End the current session
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Json<LogoutResponse> {
    Json(LogoutResponse {
        logged_out: state.auth.logout(&caller),
    })
}

/// End every session of the caller
pub async fn logout_all(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Json<LogoutAllResponse> {
    Json(LogoutAllResponse {
        invalidated: state.auth.logout_all(&caller),
    })
}

pub async fn me(AuthUser(caller): AuthUser) -> impl IntoResponse {
    Json(caller)
}

/// Active sessions of the caller
pub async fn sessions(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.auth.list_sessions(&caller),
    })
}

/// Authentication status; never fails on a bad token
pub async fn status(MaybeAuthUser(caller): MaybeAuthUser) -> Json<StatusResponse> {
    Json(StatusResponse {
        authenticated: caller.is_some(),
        user: caller,
    })
}
