//! Resource/action authorization.

use chrono::{DateTime, Timelike, Utc};

use crate::error::AuthError;
use crate::models::{Action, Permission, Resource, Role};

/// The caller as seen by the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub id: &'a str,
    pub role: Role,
    pub permissions: &'a [String],
}

impl<'a> Subject<'a> {
    pub fn new(id: &'a str, role: Role, permissions: &'a [String]) -> Self {
        Self {
            id,
            role,
            permissions,
        }
    }
}

/// Extra constraint attached to a route's permission requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCondition {
    /// Caller must own the target (admins exempt).
    RequireOwnership,
    /// Caller may act on their own record (admins exempt).
    AllowSelf,
    /// Allowed only between `start_hour` (inclusive) and `end_hour` (exclusive), UTC.
    /// Wraps midnight when `start_hour > end_hour`; equal hours mean all day.
    TimeWindow { start_hour: u8, end_hour: u8 },
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub resource: Resource,
    pub action: Action,
    pub target_id: Option<String>,
    pub conditions: Vec<AccessCondition>,
}

impl AccessRequest {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self {
            resource,
            action,
            target_id: None,
            conditions: Vec::new(),
        }
    }

    pub fn target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_condition(mut self, condition: AccessCondition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Stateless permission evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    pub fn authorize(subject: &Subject<'_>, request: &AccessRequest) -> Result<(), AuthError> {
        Self::authorize_at(subject, request, Utc::now())
    }

    /// Decide `request` for `subject` as of `now`. Only `TimeWindow` reads the clock.
    pub fn authorize_at(
        subject: &Subject<'_>,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if subject.role == Role::SuperAdmin {
            return Ok(());
        }

        if !Self::has_permission(subject.permissions, request.resource, request.action) {
            return Err(forbidden(request));
        }

        for condition in &request.conditions {
            let satisfied = match *condition {
                AccessCondition::RequireOwnership | AccessCondition::AllowSelf => {
                    match request.target_id.as_deref() {
                        Some(target) => subject.id == target || subject.role.is_elevated(),
                        None => true,
                    }
                }
                AccessCondition::TimeWindow {
                    start_hour,
                    end_hour,
                } => within_hours(now.hour(), start_hour.into(), end_hour.into()),
            };

            if !satisfied {
                tracing::debug!(
                    subject_id = %subject.id,
                    resource = %request.resource,
                    action = %request.action,
                    condition = ?condition,
                    "Access condition not met"
                );
                return Err(forbidden(request));
            }
        }

        Ok(())
    }

    /// Exact grant, resource wildcard, or global wildcard. Unparseable entries grant nothing.
    pub fn has_permission(permissions: &[String], resource: Resource, action: Action) -> bool {
        permissions
            .iter()
            .filter_map(|p| p.parse::<Permission>().ok())
            .any(|p| p.grants(resource, action))
    }
}

fn within_hours(hour: u32, start: u32, end: u32) -> bool {
    match start.cmp(&end) {
        std::cmp::Ordering::Less => hour >= start && hour < end,
        std::cmp::Ordering::Greater => hour >= start || hour < end,
        std::cmp::Ordering::Equal => true,
    }
}

fn forbidden(request: &AccessRequest) -> AuthError {
    AuthError::Forbidden {
        resource: request.resource.to_string(),
        action: request.action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn perms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_exact_permission() {
        let permissions = perms(&["pages.read"]);
        let viewer = Subject::new("u1", Role::Viewer, &permissions);

        assert!(
            PermissionEvaluator::authorize(&viewer, &AccessRequest::new(Resource::Pages, Action::Read))
                .is_ok()
        );
        let err = PermissionEvaluator::authorize(
            &viewer,
            &AccessRequest::new(Resource::Pages, Action::Update),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Forbidden { ref resource, ref action } if resource == "pages" && action == "update"
        ));
    }

    #[test]
    fn test_resource_wildcard() {
        let permissions = perms(&["pages.*"]);
        let editor = Subject::new("u1", Role::Editor, &permissions);

        for action in [Action::Read, Action::Update, Action::Delete] {
            assert!(PermissionEvaluator::authorize(
                &editor,
                &AccessRequest::new(Resource::Pages, action)
            )
            .is_ok());
        }
        assert!(PermissionEvaluator::authorize(
            &editor,
            &AccessRequest::new(Resource::Media, Action::Read)
        )
        .is_err());
    }

    #[test]
    fn test_global_wildcard_grants_everything() {
        let permissions = perms(&["*"]);
        let subject = Subject::new("u1", Role::Viewer, &permissions);
        assert!(PermissionEvaluator::has_permission(
            subject.permissions,
            Resource::Settings,
            Action::Manage
        ));
    }

    #[test]
    fn test_super_admin_ignores_permission_list() {
        let empty: Vec<String> = Vec::new();
        let root = Subject::new("root", Role::SuperAdmin, &empty);

        for resource in Resource::ALL {
            for action in Action::ALL {
                let request = AccessRequest::new(resource, action)
                    .target("someone-else")
                    .with_condition(AccessCondition::RequireOwnership)
                    .with_condition(AccessCondition::TimeWindow {
                        start_hour: 9,
                        end_hour: 10,
                    });
                assert!(PermissionEvaluator::authorize_at(&root, &request, at_hour(3)).is_ok());
            }
        }
    }

    #[test]
    fn test_ownership_condition() {
        let permissions = perms(&["posts.update"]);
        let author = Subject::new("a", Role::Author, &permissions);
        let admin = Subject::new("admin", Role::Admin, &permissions);

        let own = AccessRequest::new(Resource::Posts, Action::Update)
            .target("a")
            .with_condition(AccessCondition::RequireOwnership);
        let other = AccessRequest::new(Resource::Posts, Action::Update)
            .target("b")
            .with_condition(AccessCondition::RequireOwnership);

        assert!(PermissionEvaluator::authorize(&author, &own).is_ok());
        assert!(PermissionEvaluator::authorize(&author, &other).is_err());
        assert!(PermissionEvaluator::authorize(&admin, &other).is_ok());
    }

    #[test]
    fn test_allow_self_still_requires_permission() {
        let none: Vec<String> = Vec::new();
        let subject = Subject::new("a", Role::Viewer, &none);
        let request = AccessRequest::new(Resource::Users, Action::Read)
            .target("a")
            .with_condition(AccessCondition::AllowSelf);
        assert!(PermissionEvaluator::authorize(&subject, &request).is_err());
    }

    #[test]
    fn test_condition_without_target_is_not_applied() {
        let permissions = perms(&["posts.update"]);
        let author = Subject::new("a", Role::Author, &permissions);
        let request = AccessRequest::new(Resource::Posts, Action::Update)
            .with_condition(AccessCondition::RequireOwnership);
        assert!(PermissionEvaluator::authorize(&author, &request).is_ok());
    }

    #[test]
    fn test_time_window_including_wrap() {
        let permissions = perms(&["settings.update"]);
        let admin = Subject::new("admin", Role::Admin, &permissions);

        let office = AccessRequest::new(Resource::Settings, Action::Update).with_condition(
            AccessCondition::TimeWindow {
                start_hour: 9,
                end_hour: 17,
            },
        );
        assert!(PermissionEvaluator::authorize_at(&admin, &office, at_hour(9)).is_ok());
        assert!(PermissionEvaluator::authorize_at(&admin, &office, at_hour(17)).is_err());

        let overnight = AccessRequest::new(Resource::Settings, Action::Update).with_condition(
            AccessCondition::TimeWindow {
                start_hour: 22,
                end_hour: 6,
            },
        );
        assert!(PermissionEvaluator::authorize_at(&admin, &overnight, at_hour(23)).is_ok());
        assert!(PermissionEvaluator::authorize_at(&admin, &overnight, at_hour(2)).is_ok());
        assert!(PermissionEvaluator::authorize_at(&admin, &overnight, at_hour(12)).is_err());
    }

    #[test]
    fn test_unknown_permission_strings_grant_nothing() {
        let permissions = perms(&["pages", "pages.fly", "unknown.*", ""]);
        assert!(!PermissionEvaluator::has_permission(
            &permissions,
            Resource::Pages,
            Action::Read
        ));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let permissions = perms(&["leads.read"]);
        let subject = Subject::new("u1", Role::Editor, &permissions);
        let request = AccessRequest::new(Resource::Leads, Action::Read);
        let now = at_hour(12);
        let first = PermissionEvaluator::authorize_at(&subject, &request, now).is_ok();
        for _ in 0..10 {
            assert_eq!(
                PermissionEvaluator::authorize_at(&subject, &request, now).is_ok(),
                first
            );
        }
    }
}
