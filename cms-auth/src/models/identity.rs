//! Identity model - CMS staff accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::permission::default_permission_strings;

/// Staff roles, lowest to highest privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Author,
    Editor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Viewer,
        Role::Author,
        Role::Editor,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Author => "author",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Admin and super_admin may waive ownership and self-access conditions.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identities are never deleted, only deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Deactivated,
}

/// Identity entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub status: IdentityStatus,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new active identity carrying the role's default permissions.
    pub fn new(email: &str, role: Role, display_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.trim().to_string(),
            display_name,
            role,
            permissions: default_permission_strings(role),
            metadata: BTreeMap::new(),
            status: IdentityStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    /// Change role and replace the permission list with the new role's defaults.
    pub fn assign_role(&mut self, role: Role) {
        self.role = role;
        self.permissions = default_permission_strings(role);
    }
}

/// Lookup key for case-insensitive email uniqueness.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
