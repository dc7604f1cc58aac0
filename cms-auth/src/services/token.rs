use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs;
use uuid::Uuid;

use crate::config::{Environment, JwtConfig, MAX_CLOCK_SKEW_SECONDS, MIN_PROD_SECRET_LEN};
use crate::error::AuthError;
use crate::models::{Identity, Role};
use crate::services::SessionRegistry;

/// Audience marker of access tokens.
pub const ACCESS_AUDIENCE: &str = "cms-access";
/// Audience marker of refresh tokens; keeps an access token from being replayed as one.
pub const REFRESH_AUDIENCE: &str = "cms-refresh";

const REFRESH_KEY_LABEL: &[u8] = b"cms-auth/refresh-token-signing-key";

/// Stateless issuer and verifier of signed access/refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    algorithm: Algorithm,
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    issuer: String,
    clock_skew_seconds: i64,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
    /// Identity ID
    pub id: String,
    pub email: String,
    pub role: Role,
    /// Permission snapshot at issue time
    pub permissions: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub iss: String,
    pub aud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenClaims {
    /// Random token ID
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub token_version: u64,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_count: Option<u32>,
}

/// Optional extras embedded in an access token.
#[derive(Debug, Clone, Default)]
pub struct AccessTokenContext {
    pub session_id: Option<String>,
    pub token_version: Option<u64>,
    pub auth_method: Option<String>,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Token pair returned to the client
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenService {
    /// Build signing keys. Any failure here is fatal at startup.
    pub fn new(config: &JwtConfig, environment: Environment) -> Result<Self, AuthError> {
        let (access_encoding_key, access_decoding_key, refresh_encoding_key, refresh_decoding_key) =
            if config.is_hmac() {
                let secret = config.secret.as_ref().ok_or_else(|| {
                    AuthError::Configuration("JWT_SECRET is required for HMAC signing".to_string())
                })?;
                let secret = secret.expose_secret();

                if environment == Environment::Prod && secret.len() < MIN_PROD_SECRET_LEN {
                    return Err(AuthError::Configuration(format!(
                        "JWT_SECRET must be at least {} characters in production",
                        MIN_PROD_SECRET_LEN
                    )));
                }
                if secret.len() < MIN_PROD_SECRET_LEN {
                    tracing::warn!("JWT_SECRET is shorter than the production minimum");
                }

                let refresh_secret = match config.refresh_secret.as_ref() {
                    Some(s) => s.expose_secret().clone(),
                    None => derive_refresh_secret(secret)?,
                };

                (
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                    EncodingKey::from_secret(refresh_secret.as_bytes()),
                    DecodingKey::from_secret(refresh_secret.as_bytes()),
                )
            } else {
                let private_key_path = config.private_key_path.as_deref().ok_or_else(|| {
                    AuthError::Configuration("JWT_PRIVATE_KEY_PATH is required for RSA".to_string())
                })?;
                let public_key_path = config.public_key_path.as_deref().ok_or_else(|| {
                    AuthError::Configuration("JWT_PUBLIC_KEY_PATH is required for RSA".to_string())
                })?;

                let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
                    AuthError::Configuration(format!(
                        "Failed to read private key from {}: {}",
                        private_key_path, e
                    ))
                })?;
                let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    AuthError::Configuration(format!(
                        "Failed to read public key from {}: {}",
                        public_key_path, e
                    ))
                })?;

                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| {
                        AuthError::Configuration(format!("Failed to parse private key: {}", e))
                    })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| {
                        AuthError::Configuration(format!("Failed to parse public key: {}", e))
                    })?;

                (
                    encoding_key.clone(),
                    decoding_key.clone(),
                    encoding_key,
                    decoding_key,
                )
            };

        tracing::info!(algorithm = ?config.algorithm, "Token service initialized");

        Ok(Self {
            algorithm: config.algorithm,
            access_encoding_key,
            access_decoding_key,
            refresh_encoding_key,
            refresh_decoding_key,
            access_token_ttl_seconds: config.access_token_ttl_seconds,
            refresh_token_ttl_seconds: config.refresh_token_ttl_seconds,
            issuer: config.issuer.clone(),
            clock_skew_seconds: config.clock_skew_seconds.clamp(0, MAX_CLOCK_SKEW_SECONDS),
        })
    }

    /// Issue an access token for an identity, optionally bound to a session.
    pub fn issue_access_token(
        &self,
        identity: &Identity,
        session_id: Option<&str>,
        token_version: Option<u64>,
    ) -> Result<String, AuthError> {
        self.issue_access_token_with(
            identity,
            &AccessTokenContext {
                session_id: session_id.map(str::to_string),
                token_version,
                ..AccessTokenContext::default()
            },
        )
    }

    pub fn issue_access_token_with(
        &self,
        identity: &Identity,
        context: &AccessTokenContext,
    ) -> Result<String, AuthError> {
        let (iat, exp) = issue_window(self.access_token_ttl_seconds);

        let claims = AccessTokenClaims {
            id: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            permissions: identity.permissions.clone(),
            iat,
            exp,
            nbf: None,
            iss: self.issuer.clone(),
            aud: ACCESS_AUDIENCE.to_string(),
            session_id: context.session_id.clone(),
            token_version: context.token_version,
            metadata: (!identity.metadata.is_empty()).then(|| identity.metadata.clone()),
            auth_method: context.auth_method.clone(),
            device_fingerprint: context.device_fingerprint.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.access_encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Issue a refresh token bound to a session and its current token version.
    pub fn issue_refresh_token(
        &self,
        identity: &Identity,
        session_id: &str,
        token_version: u64,
    ) -> Result<String, AuthError> {
        self.mint_refresh_token(&identity.id, session_id, token_version, None, None)
    }

    fn mint_refresh_token(
        &self,
        user_id: &str,
        session_id: &str,
        token_version: u64,
        device_fingerprint: Option<String>,
        rotation_count: Option<u32>,
    ) -> Result<String, AuthError> {
        let (iat, exp) = issue_window(self.refresh_token_ttl_seconds);

        let claims = RefreshTokenClaims {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            token_version,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: REFRESH_AUDIENCE.to_string(),
            device_fingerprint,
            rotation_count,
        };

        encode(&Header::new(self.algorithm), &claims, &self.refresh_encoding_key).map_err(|e| {
            AuthError::Internal(anyhow::anyhow!("Failed to encode refresh token: {}", e))
        })
    }

    /// Issue an access/refresh pair for a freshly created session.
    pub fn issue_token_pair(
        &self,
        identity: &Identity,
        context: &AccessTokenContext,
    ) -> Result<TokenResponse, AuthError> {
        let session_id = context
            .session_id
            .as_deref()
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("Token pair requires a session")))?;
        let token_version = context.token_version.unwrap_or(1);

        let access_token = self.issue_access_token_with(identity, context)?;
        let refresh_token = self.mint_refresh_token(
            &identity.id,
            session_id,
            token_version,
            context.device_fingerprint.clone(),
            Some(0),
        )?;

        Ok(self.token_response(access_token, refresh_token))
    }

    /// Validate and decode an access token
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let claims: AccessTokenClaims =
            self.decode_claims(token, &self.access_decoding_key, ACCESS_AUDIENCE)?;
        self.check_time_claims(claims.iat, claims.exp, claims.nbf)?;
        Ok(claims)
    }

    /// Validate and decode a refresh token
    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, AuthError> {
        let claims: RefreshTokenClaims =
            self.decode_claims(token, &self.refresh_decoding_key, REFRESH_AUDIENCE)?;
        self.check_time_claims(claims.iat, claims.exp, None)?;
        Ok(claims)
    }

    /// Mint a new pair from verified refresh claims.
    ///
    /// The session must still be active and at the claims' token version, and the refresh
    /// token id must not have been rotated before. These checks run under the session's
    /// entry lock, so a concurrent invalidation is observed either before (rotation fails)
    /// or after (rotation succeeded first). Each refresh token rotates at most once.
    pub fn rotate_token_pair(
        &self,
        claims: &RefreshTokenClaims,
        identity: &Identity,
        sessions: &SessionRegistry,
    ) -> Result<TokenResponse, AuthError> {
        if identity.id != claims.user_id {
            return Err(AuthError::InvalidToken(
                "Refresh token subject mismatch".to_string(),
            ));
        }

        let session = sessions
            .consume_refresh(&claims.session_id, claims.token_version, &claims.id)
            .map_err(|e| match e {
                AuthError::SessionExpired | AuthError::TokenInvalidated => {
                    AuthError::TokenInvalidated
                }
                other => other,
            })?;

        if session.identity_id != claims.user_id {
            return Err(AuthError::TokenInvalidated);
        }

        let access_token = self.issue_access_token_with(
            identity,
            &AccessTokenContext {
                session_id: Some(session.id.clone()),
                token_version: Some(session.token_version),
                auth_method: Some("refresh".to_string()),
                device_fingerprint: session.device_fingerprint.clone(),
                ..AccessTokenContext::default()
            },
        )?;
        let refresh_token = self.mint_refresh_token(
            &claims.user_id,
            &session.id,
            session.token_version,
            claims.device_fingerprint.clone(),
            Some(claims.rotation_count.unwrap_or(0).saturating_add(1)),
        )?;

        metrics::counter!("auth_token_rotations_total").increment(1);
        tracing::info!(
            user_id = %claims.user_id,
            session_id = %session.id,
            "Token pair rotated"
        );

        Ok(self.token_response(access_token, refresh_token))
    }

    /// Get access token lifetime in seconds (for client info)
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    fn token_response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
        }
    }

    fn decode_claims<T: DeserializeOwned>(
        &self,
        token: &str,
        key: &DecodingKey,
        audience: &str,
    ) -> Result<T, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry and not-before are checked by `check_time_claims` with explicit boundaries.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    /// Expiry is strict (`now >= exp` is expired); skew tolerance only softens issue-side checks.
    fn check_time_claims(&self, iat: i64, exp: i64, nbf: Option<i64>) -> Result<(), AuthError> {
        let now_ms = Utc::now().timestamp_millis();
        let skew_ms = self.clock_skew_seconds * 1000;

        if now_ms >= exp.saturating_mul(1000) {
            return Err(AuthError::TokenExpired);
        }

        if let Some(nbf) = nbf {
            if nbf.saturating_mul(1000) > now_ms + skew_ms {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        if iat.saturating_mul(1000) > now_ms + skew_ms {
            return Err(AuthError::TokenNotYetValid);
        }

        Ok(())
    }
}

/// `(iat, exp)` in whole seconds; `exp` is rounded up so the lifetime is never shorter than `ttl`.
fn issue_window(ttl_seconds: i64) -> (i64, i64) {
    let now_ms = Utc::now().timestamp_millis();
    let iat = now_ms.div_euclid(1000);
    let exp_ms = now_ms + ttl_seconds * 1000;
    let exp = exp_ms.div_euclid(1000) + i64::from(exp_ms.rem_euclid(1000) != 0);
    (iat, exp)
}

fn derive_refresh_secret(access_secret: &str) -> Result<String, AuthError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(access_secret.as_bytes())
        .map_err(|e| AuthError::Configuration(format!("Invalid JWT_SECRET: {}", e)))?;
    mac.update(REFRESH_KEY_LABEL);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
