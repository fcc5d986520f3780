//! Static permission catalog.
//!
//! Every permission token the service knows about is enumerated here, together
//! with the static role -> permission table. `Admin` is not listed by hand: it is
//! the whole of [`ALL_PERMISSIONS`], so a token added below is granted to it
//! automatically.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Permission token of the form `<resource>:<verb>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "books:edit")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        ALL_PERMISSIONS.contains(&self.as_str())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

/// Well-known permission names
pub mod permissions {
    // Books
    pub const BOOKS_VIEW: &str = "books:view";
    pub const BOOKS_CREATE: &str = "books:create";
    pub const BOOKS_EDIT: &str = "books:edit";
    pub const BOOKS_DELETE: &str = "books:delete";

    // Borrowings
    pub const BORROWS_VIEW: &str = "borrows:view";
    pub const BORROWS_CREATE: &str = "borrows:create";
    pub const BORROWS_APPROVE: &str = "borrows:approve";
    pub const BORROWS_RETURN: &str = "borrows:return";

    // Reservations
    pub const RESERVATIONS_VIEW: &str = "reservations:view";
    pub const RESERVATIONS_CREATE: &str = "reservations:create";
    pub const RESERVATIONS_MANAGE: &str = "reservations:manage";

    // Shifts
    pub const SHIFTS_VIEW: &str = "shifts:view";
    pub const SHIFTS_MANAGE: &str = "shifts:manage";

    pub const FILES_UPLOAD: &str = "files:upload";
    pub const REPORTS_VIEW: &str = "reports:view";

    // Users
    pub const USERS_VIEW: &str = "users:view";
    pub const USERS_EDIT: &str = "users:edit";
    pub const USERS_DELETE: &str = "users:delete";
    pub const USERS_MANAGE: &str = "users:manage";

    // Roles
    pub const ROLES_VIEW: &str = "roles:view";
    pub const ROLES_MANAGE: &str = "roles:manage";
    pub const ROLES_ASSIGN: &str = "roles:assign";

    // Audit trail
    pub const AUDIT_VIEW: &str = "audit:view";
    pub const AUDIT_MANAGE: &str = "audit:manage";
}

use permissions::*;

pub const ALL_PERMISSIONS: &[&str] = &[
    BOOKS_VIEW,
    BOOKS_CREATE,
    BOOKS_EDIT,
    BOOKS_DELETE,
    BORROWS_VIEW,
    BORROWS_CREATE,
    BORROWS_APPROVE,
    BORROWS_RETURN,
    RESERVATIONS_VIEW,
    RESERVATIONS_CREATE,
    RESERVATIONS_MANAGE,
    SHIFTS_VIEW,
    SHIFTS_MANAGE,
    FILES_UPLOAD,
    REPORTS_VIEW,
    USERS_VIEW,
    USERS_EDIT,
    USERS_DELETE,
    USERS_MANAGE,
    ROLES_VIEW,
    ROLES_MANAGE,
    ROLES_ASSIGN,
    AUDIT_VIEW,
    AUDIT_MANAGE,
];

const STAFF_PERMISSIONS: &[&str] = &[
    BOOKS_VIEW,
    BOOKS_CREATE,
    BOOKS_EDIT,
    BORROWS_VIEW,
    BORROWS_CREATE,
    BORROWS_APPROVE,
    BORROWS_RETURN,
    RESERVATIONS_VIEW,
    RESERVATIONS_MANAGE,
    SHIFTS_VIEW,
    FILES_UPLOAD,
    REPORTS_VIEW,
    USERS_VIEW,
];

const USER_PERMISSIONS: &[&str] = &[
    BOOKS_VIEW,
    BORROWS_VIEW,
    BORROWS_CREATE,
    RESERVATIONS_VIEW,
    RESERVATIONS_CREATE,
];

/// Consumer-facing role vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum StaticRole {
    Admin,
    Staff,
    User,
}

impl StaticRole {
    pub const CANONICAL: [StaticRole; 3] = [StaticRole::Admin, StaticRole::Staff, StaticRole::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            StaticRole::Admin => "Admin",
            StaticRole::Staff => "Staff",
            StaticRole::User => "User",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StaticRole::Admin => "Full access to every operation",
            StaticRole::Staff => "Library staff: catalog, circulation and reservations",
            StaticRole::User => "Reader: browse, borrow and reserve",
        }
    }

    /// Resolves a role name from either vocabulary.
    ///
    /// Anything unrecognized resolves to [`StaticRole::User`], never to an error or a
    /// more privileged role.
    pub fn resolve(name: &str) -> StaticRole {
        if let Ok(role) = name.parse::<StaticRole>() {
            return role;
        }
        match name.parse::<BackendRole>() {
            Ok(backend) => backend.frontend(),
            Err(_) => StaticRole::User,
        }
    }

    /// Catalog entries granted to this role.
    pub fn grants(&self) -> &'static [&'static str] {
        match self {
            StaticRole::Admin => ALL_PERMISSIONS,
            StaticRole::Staff => STAFF_PERMISSIONS,
            StaticRole::User => USER_PERMISSIONS,
        }
    }

    pub fn permissions(&self) -> BTreeSet<Permission> {
        self.grants().iter().copied().map(Permission::from_static).collect()
    }
}

impl fmt::Display for StaticRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StaticRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(StaticRole::Admin),
            "Staff" => Ok(StaticRole::Staff),
            "User" => Ok(StaticRole::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Role vocabulary stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum BackendRole {
    Admin,
    #[serde(rename = "CTV")]
    Ctv,
    DocGia,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Admin => "Admin",
            BackendRole::Ctv => "CTV",
            BackendRole::DocGia => "DocGia",
        }
    }

    pub fn frontend(&self) -> StaticRole {
        match self {
            BackendRole::Admin => StaticRole::Admin,
            BackendRole::Ctv => StaticRole::Staff,
            BackendRole::DocGia => StaticRole::User,
        }
    }
}

impl Default for BackendRole {
    fn default() -> Self {
        BackendRole::DocGia
    }
}

impl FromStr for BackendRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(BackendRole::Admin),
            "CTV" => Ok(BackendRole::Ctv),
            "DocGia" => Ok(BackendRole::DocGia),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

/// Translates a stored backend role into the consumer vocabulary.
pub fn frontend_role_for(backend_role: &str) -> StaticRole {
    StaticRole::resolve(backend_role)
}

pub fn permissions_for_role(role: &str) -> BTreeSet<Permission> {
    StaticRole::resolve(role).permissions()
}

pub fn role_has_permission(role: &str, permission: &str) -> bool {
    StaticRole::resolve(role).grants().contains(&permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_permission() {
        for p in ALL_PERMISSIONS {
            assert!(role_has_permission("Admin", p), "Admin missing {p}");
        }
        assert_eq!(permissions_for_role("Admin").len(), ALL_PERMISSIONS.len());
    }

    #[test]
    fn non_admin_roles_are_strict_subsets() {
        let admin = permissions_for_role("Admin");
        for role in ["Staff", "User", "CTV", "DocGia"] {
            let perms = permissions_for_role(role);
            assert!(perms.is_subset(&admin));
            assert!(perms.len() < admin.len(), "{role} should be a strict subset");
        }
    }

    #[test]
    fn unknown_roles_fail_closed_to_reader() {
        let reader = permissions_for_role("User");
        assert_eq!(permissions_for_role("superuser"), reader);
        assert_eq!(permissions_for_role(""), reader);
        assert_eq!(permissions_for_role("admin"), reader);
        assert!(!role_has_permission("root", USERS_DELETE));
    }

    #[test]
    fn both_vocabularies_resolve() {
        assert_eq!(StaticRole::resolve("CTV"), StaticRole::Staff);
        assert_eq!(StaticRole::resolve("DocGia"), StaticRole::User);
        assert_eq!(StaticRole::resolve("Staff"), StaticRole::Staff);
        assert_eq!(frontend_role_for("Admin"), StaticRole::Admin);
        assert_eq!(frontend_role_for("CTV"), StaticRole::Staff);
        assert_eq!(frontend_role_for("ThuThu"), StaticRole::User);
    }

    #[test]
    fn membership_checks_agree_with_permission_sets() {
        for role in StaticRole::CANONICAL {
            let set = role.permissions();
            for p in ALL_PERMISSIONS {
                assert_eq!(role_has_permission(role.as_str(), p), set.iter().any(|held| held.as_str() == *p));
            }
        }
    }

    #[test]
    fn catalog_tokens_are_unique_and_well_formed() {
        let unique: BTreeSet<&str> = ALL_PERMISSIONS.iter().copied().collect();
        assert_eq!(unique.len(), ALL_PERMISSIONS.len());
        for p in ALL_PERMISSIONS {
            let (resource, verb) = p.split_once(':').expect("resource:verb");
            assert!(!resource.is_empty() && !verb.is_empty());
        }
    }
}
