use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error. Every variant maps to a stable machine-readable code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not yet valid")]
    TokenNotYetValid,

    #[error("Session expired")]
    SessionExpired,

    #[error("Token invalidated")]
    TokenInvalidated,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Forbidden: missing permission {resource}.{action}")]
    Forbidden { resource: String, action: String },

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::EmailTaken => "EMAIL_TAKEN",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::InvalidToken(_) => "INVALID_TOKEN",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            AppError::SessionExpired => "SESSION_EXPIRED",
            AppError::TokenInvalidated => "TOKEN_INVALIDATED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::AccountDisabled => "ACCOUNT_DISABLED",
            AppError::Forbidden { .. } => "FORBIDDEN",
            AppError::TooManyRequests(..) => "RATE_LIMITED",
            AppError::InternalError(_) => "INTERNAL_ERROR",
            AppError::ConfigError(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::EmailTaken => StatusCode::CONFLICT,
            AppError::Unauthorized(_)
            | AppError::InvalidToken(_)
            | AppError::TokenExpired
            | AppError::TokenNotYetValid
            | AppError::SessionExpired
            | AppError::TokenInvalidated
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::AccountDisabled | AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-safe message. Internal and configuration details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::ConfigError(_) => "Service misconfigured".to_string(),
            AppError::InvalidToken(_) => "Invalid token".to_string(),
            AppError::TooManyRequests(msg, _) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Request failed with internal error");
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Request failed with configuration error");
            }
            AppError::InvalidToken(reason) => {
                tracing::debug!(reason = %reason, "Rejected invalid token");
            }
            _ => {}
        }

        let status = self.status();
        let retry_after = match &self {
            AppError::TooManyRequests(_, retry) => *retry,
            _ => None,
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: self.code(),
                    message: self.public_message(),
                },
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value, Option<String>) {
        let res = err.into_response();
        let status = res.status();
        let retry = res
            .headers()
            .get(axum::http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap(), retry)
    }

    #[tokio::test]
    async fn test_token_errors_are_unauthorized_with_distinct_codes() {
        let (status, body, _) = body_json(AppError::TokenExpired).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");

        let (status, body, _) = body_json(AppError::TokenInvalidated).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "TOKEN_INVALIDATED");
    }

    #[tokio::test]
    async fn test_forbidden_names_the_failed_pair() {
        let (status, body, _) = body_json(AppError::Forbidden {
            resource: "pages".to_string(),
            action: "update".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("pages.update"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let (status, body, retry) =
            body_json(AppError::TooManyRequests("Slow down".to_string(), Some(42))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(retry.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_internal_error_does_not_leak_details() {
        let (status, body, _) =
            body_json(AppError::InternalError(anyhow::anyhow!("secret=hunter2"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Internal server error");
        assert!(!body.to_string().contains("hunter2"));
    }
}
