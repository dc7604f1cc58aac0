//! Permission vocabulary: resources, actions, grant strings and the role table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Role;

/// Content and administration areas guarded by the CMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Pages,
    Properties,
    Posts,
    Media,
    Leads,
    Users,
    Settings,
    Sessions,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Pages,
        Resource::Properties,
        Resource::Posts,
        Resource::Media,
        Resource::Leads,
        Resource::Users,
        Resource::Settings,
        Resource::Sessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Pages => "pages",
            Resource::Properties => "properties",
            Resource::Posts => "posts",
            Resource::Media => "media",
            Resource::Leads => "leads",
            Resource::Users => "users",
            Resource::Settings => "settings",
            Resource::Sessions => "sessions",
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("Unknown resource: {}", s))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Publish,
    Manage,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Publish,
        Action::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Publish => "publish",
            Action::Manage => "manage",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown action: {}", s))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single grant as carried in an identity's permission list.
///
/// Wire form: `resource.action`, `resource.*` or `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Exact(Resource, Action),
    AnyAction(Resource),
    All,
}

impl Permission {
    pub fn grants(&self, resource: Resource, action: Action) -> bool {
        match *self {
            Permission::All => true,
            Permission::AnyAction(r) => r == resource,
            Permission::Exact(r, a) => r == resource && a == action,
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Permission::All);
        }

        let (resource, action) = s
            .split_once('.')
            .ok_or_else(|| format!("Malformed permission: {}", s))?;
        let resource: Resource = resource.parse()?;

        if action == "*" {
            Ok(Permission::AnyAction(resource))
        } else {
            Ok(Permission::Exact(resource, action.parse()?))
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::All => f.write_str("*"),
            Permission::AnyAction(r) => write!(f, "{}.*", r),
            Permission::Exact(r, a) => write!(f, "{}.{}", r, a),
        }
    }
}

/// Default grants materialized onto an identity when it is created or its role changes.
pub fn default_permissions(role: Role) -> Vec<Permission> {
    use Action::*;
    use Permission::*;
    use Resource::*;

    // `users.read` lets every role read its own record; routes pair it with `AllowSelf`.
    let viewer = || {
        vec![
            Exact(Pages, Read),
            Exact(Properties, Read),
            Exact(Posts, Read),
            Exact(Media, Read),
            Exact(Users, Read),
        ]
    };

    let author = || {
        let mut grants = viewer();
        grants.extend([
            Exact(Posts, Create),
            Exact(Posts, Update),
            Exact(Media, Create),
            Exact(Media, Update),
        ]);
        grants
    };

    let editor = || {
        vec![
            AnyAction(Pages),
            AnyAction(Properties),
            AnyAction(Posts),
            AnyAction(Media),
            Exact(Leads, Read),
            Exact(Leads, Update),
            Exact(Users, Read),
        ]
    };

    match role {
        Role::Viewer => viewer(),
        Role::Author => author(),
        Role::Editor => editor(),
        Role::Admin => {
            let mut grants: Vec<Permission> = editor()
                .into_iter()
                .filter(|p| !matches!(p, Exact(Leads, _) | Exact(Users, _)))
                .collect();
            grants.extend([
                AnyAction(Leads),
                AnyAction(Users),
                AnyAction(Settings),
                AnyAction(Sessions),
            ]);
            grants
        }
        Role::SuperAdmin => vec![All],
    }
}

/// Role defaults in wire form.
pub fn default_permission_strings(role: Role) -> Vec<String> {
    default_permissions(role)
        .iter()
        .map(ToString::to_string)
        .collect()
}
