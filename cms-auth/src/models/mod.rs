pub mod identity;
pub mod login_attempt;
pub mod permission;
pub mod session;

pub use identity::{normalize_email, Identity, IdentityStatus, Role};
pub use login_attempt::LoginAttemptRecord;
pub use permission::{default_permissions, Action, Permission, Resource};
pub use session::{Session, SessionActivity, SessionInfo};
