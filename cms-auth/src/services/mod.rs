//! Services layer for cms-auth.
//!
//! Token issuance, the session registry, permission evaluation, login throttling
//! and the credential store, composed by [`AuthService`].

mod auth;
mod credentials;
mod limiter;
mod permission;
mod session;
mod token;

pub use auth::{AuthService, Caller, RequestContext};
pub use credentials::{CredentialStore, InMemoryCredentialStore, StoredCredential};
pub use limiter::{login_identifier, LoginAttemptLimiter};
pub use permission::{AccessCondition, AccessRequest, PermissionEvaluator, Subject};
pub use session::{spawn_session_sweeper, SessionRegistry};
pub use token::{
    AccessTokenClaims, AccessTokenContext, RefreshTokenClaims, TokenResponse, TokenService,
    ACCESS_AUDIENCE, REFRESH_AUDIENCE,
};
