use std::collections::BTreeSet;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::catalog::{self, BackendRole, Permission, StaticRole};
use crate::models::user::UserStatus;

/// Principal represents the resolved identity together with a snapshot of the
/// permissions it was granted at resolution time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    /// Raw backend role as stored on the user row. Never sent to clients;
    /// they only see `frontend_role`.
    #[serde(skip)]
    pub backend_role: String,
    pub frontend_role: StaticRole,
    /// Name of the persisted role referenced by the user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    pub status: UserStatus,
    #[serde(skip)]
    pub static_permissions: BTreeSet<Permission>,
    #[serde(skip)]
    pub role_permissions: BTreeSet<Permission>,
}

impl Principal {
    /// Builds a principal for `user_id` with the static grant of `backend_role`.
    pub fn new(user_id: Uuid, backend_role: impl Into<String>) -> Self {
        let backend_role = backend_role.into();
        Self {
            user_id,
            username: String::new(),
            frontend_role: catalog::frontend_role_for(&backend_role),
            static_permissions: catalog::permissions_for_role(&backend_role),
            backend_role,
            role_name: None,
            status: UserStatus::Active,
            role_permissions: BTreeSet::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = status;
        self
    }

    /// Attaches the persisted role the user references.
    pub fn with_persisted_role(
        mut self,
        name: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        self.role_name = Some(name.into());
        self.role_permissions = permissions.into_iter().collect();
        self
    }

    /// Union of the static grant and the persisted role's grant.
    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        self.static_permissions
            .union(&self.role_permissions)
            .cloned()
            .collect()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.static_permissions.iter().any(|p| p.as_str() == permission)
            || self.role_permissions.iter().any(|p| p.as_str() == permission)
    }

    /// True when either role vocabulary designates the administrative role.
    pub fn is_admin(&self) -> bool {
        self.backend_role.parse::<BackendRole>() == Ok(BackendRole::Admin)
            || self.role_name.as_deref() == Some(StaticRole::Admin.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::catalog::permissions;

    #[test]
    fn effective_permissions_is_the_union() {
        let principal = Principal::new(Uuid::new_v4(), "DocGia")
            .with_persisted_role("Staff", [Permission::from_static(permissions::BOOKS_EDIT)]);

        let effective = principal.effective_permissions();
        assert!(effective.contains(&Permission::from_static(permissions::BOOKS_VIEW)));
        assert!(effective.contains(&Permission::from_static(permissions::BOOKS_EDIT)));
        assert!(principal.has_permission(permissions::BOOKS_EDIT));
        assert!(!principal.has_permission(permissions::USERS_DELETE));
    }

    #[test]
    fn admin_is_recognized_by_either_vocabulary() {
        assert!(Principal::new(Uuid::new_v4(), "Admin").is_admin());
        assert!(Principal::new(Uuid::new_v4(), "DocGia")
            .with_persisted_role("Admin", [])
            .is_admin());
        assert!(!Principal::new(Uuid::new_v4(), "CTV")
            .with_persisted_role("Staff", [])
            .is_admin());
    }
}
