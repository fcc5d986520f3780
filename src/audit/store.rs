use sqlx::SqlitePool;

use super::entry::NewAuditEntry;
use crate::db::timestamp;

/// Append-only writer for `audit_logs`. Always writes the nested-actor shape.
#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, entry: &NewAuditEntry) -> Result<(), sqlx::Error> {
        let actor = serde_json::to_string(&entry.actor)
            .map_err(|e| sqlx::Error::Protocol(format!("audit actor not encodable: {e}")))?;
        let details = entry.details.to_string();
        let payload = entry.request_payload.as_ref().map(|value| value.to_string());
        let at = timestamp(entry.timestamp);

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor, action, resource_type, resource_id, method, endpoint, description, details,
                success, status, status_code, ip_address, user_agent, request_payload,
                response_message, error_message, duration_ms, timestamp, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(actor)
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(&entry.description)
        .bind(details)
        .bind(entry.success())
        .bind(entry.status.as_str())
        .bind(entry.status_code.map(i64::from))
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(payload)
        .bind(&entry.response_message)
        .bind(&entry.error_message)
        .bind(entry.duration_ms)
        .bind(&at)
        .bind(&at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
