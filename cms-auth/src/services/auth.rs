use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::dtos::auth::{LoginRequest, RegisterRequest};
use crate::error::AuthError;
use crate::models::{Identity, IdentityStatus, Role, SessionInfo};
use crate::services::{
    login_identifier, AccessTokenClaims, AccessTokenContext, CredentialStore, LoginAttemptLimiter,
    SessionRegistry, TokenResponse, TokenService,
};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Where a request came from, as far as the session cares.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub device_fingerprint: Option<String>,
}

/// Resolved caller handed to route handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_version: Option<u64>,
}

impl From<AccessTokenClaims> for Caller {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
            role: claims.role,
            permissions: claims.permissions,
            session_id: claims.session_id,
            token_version: claims.token_version,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    tokens: TokenService,
    sessions: SessionRegistry,
    limiter: LoginAttemptLimiter,
    login_max_attempts: u32,
    login_window: Duration,
    dummy_hash: PasswordHashString,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        let tokens = TokenService::new(&config.jwt, config.environment)?;
        let login_window_seconds = i64::try_from(config.rate_limit.login_window_seconds)
            .map_err(|_| AuthError::Configuration("Login window is too large".to_string()))?;

        Ok(Self {
            credentials,
            tokens,
            sessions: SessionRegistry::new(),
            limiter: LoginAttemptLimiter::new(),
            login_max_attempts: config.rate_limit.login_attempts,
            login_window: Duration::seconds(login_window_seconds),
            dummy_hash: hash_password(&Password::new(uuid::Uuid::new_v4().to_string()))?,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn limiter(&self) -> &LoginAttemptLimiter {
        &self.limiter
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<Identity, AuthError> {
        let password_hash = hash_password(&Password::new(req.password))?;
        let identity = Identity::new(&req.email, Role::Viewer, req.display_name);
        let identity = self.credentials.insert(identity, password_hash).await?;

        tracing::info!(user_id = %identity.id, "Identity registered");
        Ok(identity)
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        context: &RequestContext,
    ) -> Result<TokenResponse, AuthError> {
        let identifier = login_identifier(&context.ip, &req.email);

        if !self
            .limiter
            .check_and_increment(&identifier, self.login_max_attempts, self.login_window)
        {
            metrics::counter!("auth_login_attempts_total", "outcome" => "rate_limited")
                .increment(1);
            tracing::warn!(ip = %context.ip, "Login rate limit exceeded");
            let retry_after_secs = self
                .limiter
                .retry_after(&identifier)
                .map(|d| d.num_seconds().max(1) as u64);
            return Err(AuthError::RateLimited { retry_after_secs });
        }

        // Unknown emails pay the same Argon2 cost as a wrong password.
        let stored = self.credentials.find_by_email(&req.email).await?;
        let password_hash = stored
            .as_ref()
            .map_or(&self.dummy_hash, |stored| &stored.password_hash);
        let password_matches = verify_password(&Password::new(req.password), password_hash)?;

        let stored = match stored {
            Some(stored) if password_matches => stored,
            Some(stored) => {
                metrics::counter!("auth_login_attempts_total", "outcome" => "failure")
                    .increment(1);
                tracing::info!(
                    user_id = %stored.identity.id,
                    ip = %context.ip,
                    "Login failed: wrong password"
                );
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                metrics::counter!("auth_login_attempts_total", "outcome" => "failure")
                    .increment(1);
                tracing::info!(ip = %context.ip, "Login failed: unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let identity = stored.identity;
        if !identity.is_active() {
            metrics::counter!("auth_login_attempts_total", "outcome" => "disabled").increment(1);
            return Err(AuthError::AccountDisabled);
        }

        self.limiter.reset(&identifier);

        let session = self.sessions.create(
            &identity.id,
            &context.ip,
            &context.user_agent,
            context.device_fingerprint.as_deref(),
        );

        let response = self.tokens.issue_token_pair(
            &identity,
            &AccessTokenContext {
                session_id: Some(session.id.clone()),
                token_version: Some(session.token_version),
                auth_method: Some("password".to_string()),
                device_fingerprint: session.device_fingerprint.clone(),
                ip_address: Some(context.ip.clone()),
                user_agent: Some(context.user_agent.clone()),
            },
        )?;

        metrics::counter!("auth_login_attempts_total", "outcome" => "success").increment(1);
        tracing::info!(
            user_id = %identity.id,
            session_id = %session.id,
            ip = %context.ip,
            "Login succeeded"
        );
        Ok(response)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self.tokens.verify_refresh_token(refresh_token)?;

        let identity = self
            .credentials
            .find_by_id(&claims.user_id)
            .await?
            .ok_or(AuthError::TokenInvalidated)?;

        if !identity.is_active() {
            return Err(AuthError::AccountDisabled);
        }

        self.tokens
            .rotate_token_pair(&claims, &identity, &self.sessions)
    }

    /// Verify a bearer token and, when it names a session, cross-check the session.
    pub fn authenticate(
        &self,
        token: &str,
        context: Option<&RequestContext>,
    ) -> Result<Caller, AuthError> {
        let result = self.resolve_caller(token, context);
        let label = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("auth_token_verifications_total", "result" => label).increment(1);
        result
    }

    fn resolve_caller(
        &self,
        token: &str,
        context: Option<&RequestContext>,
    ) -> Result<Caller, AuthError> {
        let claims = self.tokens.verify_access_token(token)?;

        if let Some(session_id) = claims.session_id.as_deref() {
            self.sessions.verify(session_id, claims.token_version)?;
            if let Some(context) = context {
                self.sessions
                    .observe(session_id, &context.ip, &context.user_agent);
            }
        }

        Ok(Caller::from(claims))
    }

    pub fn logout(&self, caller: &Caller) -> bool {
        let logged_out = caller
            .session_id
            .as_deref()
            .map(|id| self.sessions.invalidate(id))
            .unwrap_or(false);

        tracing::info!(user_id = %caller.id, logged_out, "Logout");
        logged_out
    }

    pub fn logout_all(&self, caller: &Caller) -> usize {
        self.sessions.invalidate_all_for_identity(&caller.id)
    }

    pub fn list_sessions(&self, caller: &Caller) -> Vec<SessionInfo> {
        self.sessions
            .list_for_identity(&caller.id)
            .into_iter()
            .map(|s| SessionInfo::from_session(s, caller.session_id.as_deref()))
            .collect()
    }

    pub async fn get_identity(&self, identity_id: &str) -> Result<Identity, AuthError> {
        self.credentials
            .find_by_id(identity_id)
            .await?
            .ok_or(AuthError::NotFound("User"))
    }

    /// Reassign a role. The identity's sessions end so new tokens carry the new permissions.
    pub async fn change_role(
        &self,
        actor: &Caller,
        identity_id: &str,
        role: Role,
    ) -> Result<Identity, AuthError> {
        let target = self.get_identity(identity_id).await?;

        // Only a super_admin may create or demote another super_admin.
        if (role == Role::SuperAdmin || target.role == Role::SuperAdmin)
            && actor.role != Role::SuperAdmin
        {
            return Err(AuthError::Forbidden {
                resource: "users".to_string(),
                action: "manage".to_string(),
            });
        }

        let updated = self.credentials.update_role(identity_id, role).await?;
        let invalidated = self.sessions.invalidate_all_for_identity(identity_id);

        tracing::info!(
            actor_id = %actor.id,
            user_id = %identity_id,
            from = %target.role,
            to = %role,
            invalidated,
            "Role changed"
        );
        Ok(updated)
    }

    pub async fn deactivate(&self, actor: &Caller, identity_id: &str) -> Result<Identity, AuthError> {
        let target = self.get_identity(identity_id).await?;

        if target.role == Role::SuperAdmin && actor.role != Role::SuperAdmin {
            return Err(AuthError::Forbidden {
                resource: "users".to_string(),
                action: "delete".to_string(),
            });
        }

        let updated = self
            .credentials
            .set_status(identity_id, IdentityStatus::Deactivated)
            .await?;
        let invalidated = self.sessions.invalidate_all_for_identity(identity_id);

        tracing::info!(
            actor_id = %actor.id,
            user_id = %identity_id,
            invalidated,
            "Identity deactivated"
        );
        Ok(updated)
    }

    /// Ensure a super_admin exists for `email`. Safe to run on every start.
    pub async fn bootstrap_super_admin(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<Identity, AuthError> {
        if let Some(stored) = self.credentials.find_by_email(email).await? {
            if stored.identity.role == Role::SuperAdmin {
                return Ok(stored.identity);
            }
            tracing::info!(user_id = %stored.identity.id, "Promoting bootstrap admin");
            return self
                .credentials
                .update_role(&stored.identity.id, Role::SuperAdmin)
                .await;
        }

        let password_hash = hash_password(password)?;
        let identity = self
            .credentials
            .insert(Identity::new(email, Role::SuperAdmin, None), password_hash)
            .await?;

        tracing::info!(user_id = %identity.id, "Bootstrap super_admin created");
        Ok(identity)
    }
}
