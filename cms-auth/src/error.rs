use service_core::error::AppError;
use thiserror::Error;

/// Failure kinds of the authentication core.
///
/// Token, session and permission variants are recovered at the request boundary;
/// `Configuration` is only produced at startup and aborts the process.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    Unauthorized,

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

    #[error("Forbidden: missing permission {resource}.{action}")]
    Forbidden { resource: String, action: String },

    #[error("Too many login attempts")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Email already registered")]
    EmailTaken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Unauthorized => "unauthorized",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::SessionExpired => "session_expired",
            AuthError::TokenInvalidated => "token_invalidated",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Configuration(_) => "configuration",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::EmailTaken => "email_taken",
            AuthError::NotFound(_) => "not_found",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => {
                AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            }
            AuthError::InvalidToken(reason) => AppError::InvalidToken(reason),
            AuthError::TokenExpired => AppError::TokenExpired,
            AuthError::TokenNotYetValid => AppError::TokenNotYetValid,
            AuthError::SessionExpired => AppError::SessionExpired,
            AuthError::TokenInvalidated => AppError::TokenInvalidated,
            AuthError::Forbidden { resource, action } => AppError::Forbidden { resource, action },
            AuthError::RateLimited { retry_after_secs } => AppError::TooManyRequests(
                "Too many login attempts. Please try again later.".to_string(),
                retry_after_secs,
            ),
            AuthError::Configuration(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::AccountDisabled => AppError::AccountDisabled,
            AuthError::EmailTaken => AppError::EmailTaken,
            AuthError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
