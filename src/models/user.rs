use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{Actor, Auditable};
use crate::authz::catalog::{self, StaticRole};
use crate::authz::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "Active",
            UserStatus::Inactive => "Inactive",
            UserStatus::Banned => "Banned",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(UserStatus::Active),
            "Inactive" => Ok(UserStatus::Inactive),
            "Banned" => Ok(UserStatus::Banned),
            other => Err(format!("unknown user status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Consumer-facing role; backend role names are never exposed.
    pub role: StaticRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    pub status: UserStatus,
    pub additional_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor {
            id: Some(self.id),
            username: Some(self.username.clone()),
            role: Some(self.role_name.clone().unwrap_or_else(|| self.role.to_string())),
        }
    }
}

impl Auditable for User {
    fn audit_resource_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }

    fn audit_actor(&self) -> Option<Actor> {
        Some(self.actor())
    }
}

#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub backend_role: String,
    pub role_id: Option<Uuid>,
    pub role_name: Option<String>,
    /// Raw status text; anything other than `Active` makes the account unusable.
    pub status: String,
    pub additional_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbUser {
    pub fn status(&self) -> UserStatus {
        self.status.parse().unwrap_or(UserStatus::Inactive)
    }
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        let status = value.status();
        let role = catalog::frontend_role_for(&value.backend_role);
        User {
            id: value.id,
            username: value.username,
            email: value.email,
            role,
            status,
            role_id: value.role_id,
            role_name: value.role_name,
            additional_roles: value.additional_roles,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

impl Auditable for AuthResponse {
    fn audit_resource_id(&self) -> Option<String> {
        Some(self.user.id.to_string())
    }

    /// Register and login establish who the actor is.
    fn audit_actor(&self) -> Option<Actor> {
        Some(self.user.actor())
    }
}

/// The resolved identity as seen by the caller.
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user: User,
    pub identity: Principal,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetUserRoleRequest {
    pub role_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Activate,
    Deactivate,
    Suspend,
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Activate => "activate",
            BulkAction::Deactivate => "deactivate",
            BulkAction::Suspend => "suspend",
            BulkAction::Delete => "delete",
        }
    }

    /// Status the action moves a user into; `None` for deletion.
    pub fn target_status(&self) -> Option<UserStatus> {
        match self {
            BulkAction::Activate => Some(UserStatus::Active),
            BulkAction::Deactivate => Some(UserStatus::Inactive),
            BulkAction::Suspend => Some(UserStatus::Banned),
            BulkAction::Delete => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkUserRequest {
    pub user_ids: Vec<Uuid>,
    pub action: BulkAction,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkUserOutcome {
    pub user_id: Uuid,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkUserResponse {
    pub action: BulkAction,
    pub applied: usize,
    pub skipped: usize,
    pub results: Vec<BulkUserOutcome>,
}

impl Auditable for BulkUserResponse {
    fn audit_details(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "action": self.action,
            "applied": self.applied,
            "skipped": self.skipped,
            "results": self.results,
        }))
    }

    fn audit_message(&self) -> Option<String> {
        Some(format!("{} applied, {} skipped", self.applied, self.skipped))
    }
}
