//! Queries against the `users` table shared by the auth routes, the identity
//! resolver and the bulk user operations.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::row_parsers::db_user_from_row;
use super::timestamp;
use crate::errors::AppError;
use crate::models::user::{DbUser, UserStatus};

const USER_COLUMNS: &str = "id, username, email, password_hash, backend_role, role_id, role_name, status, additional_roles, created_at, updated_at";

pub async fn fetch_user_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<DbUser>, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_optional(pool).await?;
    row.as_ref().map(db_user_from_row).transpose()
}

pub async fn fetch_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<DbUser>, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    let row = sqlx::query(&sql).bind(email).fetch_optional(pool).await?;
    row.as_ref().map(db_user_from_row).transpose()
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub backend_role: &'a str,
    pub role_id: Option<Uuid>,
    pub role_name: Option<&'a str>,
}

/// Inserts a user, mapping username/email collisions to `Conflict`.
pub async fn insert_user(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<DbUser, AppError> {
    let id = Uuid::new_v4();
    let now = timestamp(Utc::now());

    let result = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, backend_role, role_id, role_name, status, additional_roles, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, '[]', ?, ?)",
    )
    .bind(id.to_string())
    .bind(new_user.username)
    .bind(new_user.email)
    .bind(new_user.password_hash)
    .bind(new_user.backend_role)
    .bind(new_user.role_id.map(|id| id.to_string()))
    .bind(new_user.role_name)
    .bind(UserStatus::Active.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {}
        Err(err) if super::is_unique_violation(&err) => {
            return Err(AppError::conflict("username or email already registered"));
        }
        Err(err) => return Err(err.into()),
    }

    fetch_user_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::internal("user vanished after insert"))
}

/// Returns false when no such user exists.
pub async fn update_status(pool: &SqlitePool, id: Uuid, status: UserStatus) -> Result<bool, AppError> {
    let result = sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_user(pool: &SqlitePool, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
