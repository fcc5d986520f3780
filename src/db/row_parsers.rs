use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::audit::entry::{Actor, AuditLogEntry, OutcomeStatus, RecordShape};
use crate::authz::catalog::Permission;
use crate::errors::AppError;
use crate::models::role::Role;
use crate::models::user::DbUser;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 (what we write)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP format, optional fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_uuid(&s)?)),
        _ => Ok(None),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

/// Decodes a JSON text column, reporting the path of the offending value.
fn parse_json<T: DeserializeOwned>(name: &str, raw: &str) -> Result<T, AppError> {
    let de = &mut serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(de)
        .map_err(|e| AppError::internal(format!("invalid json in {} at {}: {}", name, e.path(), e.inner())))
}

fn parse_opt_json<T: DeserializeOwned>(name: &str, raw: Option<String>) -> Result<Option<T>, AppError> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(parse_json(name, &raw)?)),
        _ => Ok(None),
    }
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let description: Option<String> = column(row, "description")?;
    let permissions_s: Option<String> = column(row, "permissions")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    let permissions: BTreeSet<Permission> = parse_opt_json::<Vec<Permission>>("permissions", permissions_s)?
        .unwrap_or_default()
        .into_iter()
        .collect();

    Ok(Role {
        id: parse_uuid(&id_s)?,
        name,
        description,
        permissions,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    let id_s: String = column(row, "id")?;
    let username: String = column(row, "username")?;
    let email: String = column(row, "email")?;
    let password_hash: String = column(row, "password_hash")?;
    let backend_role: String = column(row, "backend_role")?;
    let role_id_s: Option<String> = column(row, "role_id")?;
    let role_name: Option<String> = column(row, "role_name")?;
    let status: String = column(row, "status")?;
    let additional_s: Option<String> = column(row, "additional_roles")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(DbUser {
        id: parse_uuid(&id_s)?,
        username,
        email,
        password_hash,
        backend_role,
        role_id: parse_opt_uuid(role_id_s)?,
        role_name,
        status,
        additional_roles: parse_opt_json("additional_roles", additional_s)?.unwrap_or_default(),
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

/// Reads either stored audit layout into one normalized entry.
///
/// Rows carrying an `actor` document are nested-shape; anything else is read
/// from the flat legacy columns. Fields missing from the nested actor are
/// filled from the flat columns when both are present. `success` and `status`
/// are derived from each other when only one was stored.
pub fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditLogEntry, AppError> {
    let id_s: String = column(row, "id")?;
    let user_id_s: Option<String> = column(row, "user_id")?;
    let username: Option<String> = column(row, "username")?;
    let user_role: Option<String> = column(row, "user_role")?;
    let actor_s: Option<String> = column(row, "actor")?;
    let action: String = column(row, "action")?;
    let resource_type: String = column(row, "resource_type")?;
    let resource_id: Option<String> = column(row, "resource_id")?;
    let method: Option<String> = column(row, "method")?;
    let endpoint: Option<String> = column(row, "endpoint")?;
    let description: Option<String> = column(row, "description")?;
    let details_s: Option<String> = column(row, "details")?;
    let success_flag: Option<i64> = column(row, "success")?;
    let status_s: Option<String> = column(row, "status")?;
    let status_code: Option<i64> = column(row, "status_code")?;
    let ip_address: Option<String> = column(row, "ip_address")?;
    let user_agent: Option<String> = column(row, "user_agent")?;
    let payload_s: Option<String> = column(row, "request_payload")?;
    let response_message: Option<String> = column(row, "response_message")?;
    let error_message: Option<String> = column(row, "error_message")?;
    let duration_ms: Option<i64> = column(row, "duration_ms")?;
    let timestamp_s: Option<String> = column(row, "timestamp")?;
    let created_at_s: String = column(row, "created_at")?;

    let nested: Option<Actor> = parse_opt_json("actor", actor_s)?;
    let shape = if nested.is_some() {
        RecordShape::Nested
    } else {
        RecordShape::Legacy
    };

    let mut actor = nested.unwrap_or_default();
    if actor.id.is_none() {
        actor.id = parse_opt_uuid(user_id_s)?;
    }
    if actor.username.is_none() {
        actor.username = username;
    }
    if actor.role.is_none() {
        actor.role = user_role;
    }

    let (success, status) = match status_s.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let status = OutcomeStatus::parse(raw).unwrap_or(OutcomeStatus::Failure);
            (status.is_success(), status)
        }
        _ => {
            let success = success_flag.unwrap_or(0) != 0;
            (success, OutcomeStatus::from_success(success))
        }
    };

    let created_at = parse_datetime(&created_at_s)?;
    let timestamp = parse_opt_datetime(timestamp_s)?.unwrap_or(created_at);

    Ok(AuditLogEntry {
        id: parse_uuid(&id_s)?,
        actor,
        action,
        resource_type,
        resource_id,
        method,
        endpoint,
        description,
        details: parse_opt_json("details", details_s)?.unwrap_or_else(|| Value::Object(Default::default())),
        success,
        status,
        status_code,
        ip_address,
        user_agent,
        request_payload: parse_opt_json("request_payload", payload_s)?,
        response_message,
        error_message,
        duration_ms,
        timestamp,
        created_at,
        shape,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_formats_seen_in_storage() {
        assert!(parse_datetime("2025-03-01T10:00:00.000000Z").is_ok());
        assert!(parse_datetime("2025-03-01 10:00:00").is_ok());
        assert!(parse_datetime("2025-03-01").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn json_errors_name_the_path() {
        let err = parse_json::<Vec<Permission>>("permissions", r#"["books:view", 7]"#).unwrap_err();
        assert!(err.to_string().contains("permissions"), "{err}");
        assert!(err.to_string().contains("[1]"), "{err}");
    }
}
