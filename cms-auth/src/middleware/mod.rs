pub mod auth;
pub mod permission;

pub use auth::{auth_middleware, optional_auth_middleware, AuthUser, MaybeAuthUser};
pub use permission::{require_permission, PermissionGate};
