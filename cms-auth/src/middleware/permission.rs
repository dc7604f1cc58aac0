use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use service_core::error::AppError;
use std::collections::HashMap;

use crate::{
    error::AuthError,
    models::{Action, Resource},
    services::{AccessCondition, AccessRequest, Caller, PermissionEvaluator, Subject},
};

/// Per-route permission requirement, used as `route_layer` state behind `auth_middleware`.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    resource: Resource,
    action: Action,
    conditions: Vec<AccessCondition>,
    target_param: Option<&'static str>,
}

impl PermissionGate {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self {
            resource,
            action,
            conditions: Vec::new(),
            target_param: None,
        }
    }

    /// Attach a condition evaluated against the path parameter `param`.
    pub fn with_condition(mut self, condition: AccessCondition, param: &'static str) -> Self {
        self.conditions.push(condition);
        self.target_param = Some(param);
        self
    }
}

pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();

    let caller = parts
        .extensions
        .get::<Caller>()
        .cloned()
        .ok_or(AuthError::Unauthorized)?;

    let mut request = AccessRequest::new(gate.resource, gate.action);
    if let Some(param) = gate.target_param {
        let Path(params) = parts
            .extract::<Path<HashMap<String, String>>>()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if let Some(target) = params.get(param) {
            request = request.target(target.clone());
        }
    }
    for condition in &gate.conditions {
        request = request.with_condition(*condition);
    }

    let subject = Subject::new(&caller.id, caller.role, &caller.permissions);
    if let Err(e) = PermissionEvaluator::authorize(&subject, &request) {
        tracing::warn!(
            user_id = %caller.id,
            role = %caller.role,
            resource = %gate.resource,
            action = %gate.action,
            "Permission denied"
        );
        return Err(e.into());
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}
