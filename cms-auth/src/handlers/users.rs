use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::users::RoleChangeRequest,
    middleware::AuthUser,
    models::{Identity, Role},
    utils::ValidatedJson,
    AppState,
};

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Identity>, AppError> {
    let identity = state.auth.get_identity(&user_id).await?;
    Ok(Json(identity))
}

/// Change a user's role; their sessions are ended
pub async fn change_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<String>,
    ValidatedJson(req): ValidatedJson<RoleChangeRequest>,
) -> Result<Json<Identity>, AppError> {
    let role: Role = req.role.parse().map_err(AppError::BadRequest)?;
    let identity = state.auth.change_role(&caller, &user_id, role).await?;
    Ok(Json(identity))
}

pub async fn deactivate(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Identity>, AppError> {
    if caller.id == user_id {
        return Err(AppError::BadRequest(
            "Cannot deactivate your own account".to_string(),
        ));
    }
    let identity = state.auth.deactivate(&caller, &user_id).await?;
    Ok(Json(identity))
}
