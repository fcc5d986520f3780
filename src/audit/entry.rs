use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Register,
    AssignRole,
    BulkAction,
    Purge,
    System,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Read => "READ",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Register => "REGISTER",
            AuditAction::AssignRole => "ASSIGN_ROLE",
            AuditAction::BulkAction => "BULK_ACTION",
            AuditAction::Purge => "PURGE",
            AuditAction::System => "SYSTEM",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    User,
    Role,
    Book,
    Borrowing,
    Reservation,
    Shift,
    File,
    AuditLog,
    Auth,
    System,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "USER",
            ResourceType::Role => "ROLE",
            ResourceType::Book => "BOOK",
            ResourceType::Borrowing => "BORROWING",
            ResourceType::Reservation => "RESERVATION",
            ResourceType::Shift => "SHIFT",
            ResourceType::File => "FILE",
            ResourceType::AuditLog => "AUDIT_LOG",
            ResourceType::Auth => "AUTH",
            ResourceType::System => "SYSTEM",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Warning,
    Info,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Failure => "FAILURE",
            OutcomeStatus::Warning => "WARNING",
            OutcomeStatus::Info => "INFO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(OutcomeStatus::Success),
            "FAILURE" => Some(OutcomeStatus::Failure),
            "WARNING" => Some(OutcomeStatus::Warning),
            "INFO" => Some(OutcomeStatus::Info),
            _ => None,
        }
    }

    /// `SUCCESS` and `INFO` both count as a successful outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success | OutcomeStatus::Info)
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        }
    }
}

const SYSTEM_ROLE: &str = "System";
const ANONYMOUS_ROLE: &str = "Anonymous";

/// Who performed an action.
///
/// `id` is `None` for system events and for anonymous attempts that never
/// resolved to an account (a failed login, say). The two are told apart by
/// `role`: `System` or `Anonymous`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: None,
            username: Some("system".to_string()),
            role: Some(SYSTEM_ROLE.to_string()),
        }
    }

    pub fn anonymous(username: Option<String>) -> Self {
        Self {
            id: None,
            username,
            role: Some(ANONYMOUS_ROLE.to_string()),
        }
    }

    pub fn is_system(&self) -> bool {
        self.id.is_none() && self.role.as_deref() == Some(SYSTEM_ROLE)
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none() && self.role.as_deref() == Some(ANONYMOUS_ROLE)
    }
}

/// Which historical layout a stored row uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    /// Flat `user_id`/`username`/`success`/`created_at` columns.
    Legacy,
    /// Nested `actor` document with `status` and `timestamp`.
    Nested,
}

/// One audit entry as read back from storage, normalized across both shapes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor: Actor,
    pub action: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub details: Value,
    pub success: bool,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub request_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Canonical timestamp, falling back to record creation time on legacy rows.
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub shape: RecordShape,
}

/// An entry about to be written. Always persisted in the nested-actor shape.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub actor: Actor,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub description: String,
    pub details: Value,
    pub status: OutcomeStatus,
    pub status_code: Option<u16>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_payload: Option<Value>,
    pub response_message: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn new(actor: Actor, action: AuditAction, resource_type: ResourceType, status: OutcomeStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            action,
            resource_type,
            resource_id: None,
            method: None,
            endpoint: None,
            description: format!("{action} {resource_type}"),
            details: Value::Object(Default::default()),
            status,
            status_code: None,
            ip_address: None,
            user_agent: None,
            request_payload: None,
            response_message: None,
            error_message: None,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_and_system_actors_are_distinct() {
        let anonymous = Actor::anonymous(Some("ada@example.com".to_string()));
        assert!(anonymous.is_anonymous());
        assert!(!anonymous.is_system());

        let system = Actor::system();
        assert!(system.is_system());
        assert!(!system.is_anonymous());
    }
}
