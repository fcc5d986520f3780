use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::catalog::{self, Permission, StaticRole, ALL_PERMISSIONS};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = Vec<String>)]
    pub permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Cataloguer")]
    pub name: String,
    #[schema(example = "Maintains the book catalog")]
    pub description: Option<String>,
    #[serde(default)]
    #[schema(value_type = Vec<String>, example = json!(["books:view", "books:edit"]))]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<Vec<String>>)]
    pub permissions: Option<Vec<Permission>>,
}

impl Auditable for Role {
    fn audit_resource_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }

    fn audit_details(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "name": self.name,
            "permissions": self.permissions,
        }))
    }
}

/// A role the seeding step wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<Permission>,
}

impl NewRole {
    pub fn canonical(role: StaticRole) -> Self {
        Self {
            name: role.as_str().to_string(),
            description: Some(role.description().to_string()),
            permissions: role.permissions(),
        }
    }
}

/// Result of assigning a persisted role to a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role: Role,
}

impl Auditable for RoleAssignment {
    fn audit_resource_id(&self) -> Option<String> {
        Some(self.user_id.to_string())
    }

    fn audit_details(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "role_id": self.role.id, "role_name": self.role.name }))
    }
}

// =============================================================================
// PERMISSION CATALOG VIEW
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogRoleEntry {
    pub role: StaticRole,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionCatalogResponse {
    pub permissions: Vec<String>,
    pub roles: Vec<CatalogRoleEntry>,
}

impl PermissionCatalogResponse {
    pub fn current() -> Self {
        Self {
            permissions: ALL_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
            roles: StaticRole::CANONICAL
                .iter()
                .map(|role| CatalogRoleEntry {
                    role: *role,
                    permissions: catalog::permissions_for_role(role.as_str())
                        .into_iter()
                        .map(|p| p.to_string())
                        .collect(),
                })
                .collect(),
        }
    }
}
