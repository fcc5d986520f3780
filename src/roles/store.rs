use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::RoleStoreError;
use crate::authz::catalog::Permission;
use crate::db::row_parsers::role_from_row;
use crate::db::{is_foreign_key_violation, is_unique_violation, timestamp};
use crate::models::role::{Role, RoleUpdateRequest};
use crate::obligations::ObligationCheck;

const ROLE_COLUMNS: &str = "id, name, description, permissions, created_at, updated_at";

/// Access to the `roles` table and the role columns of `users`.
///
/// Name uniqueness and references from users are enforced by table
/// constraints; a losing concurrent writer sees the constraint error mapped
/// onto [`RoleStoreError`].
#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
    obligations: Arc<dyn ObligationCheck>,
}

impl RoleStore {
    pub fn new(pool: SqlitePool, obligations: Arc<dyn ObligationCheck>) -> Self {
        Self { pool, obligations }
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, RoleStoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let roles = rows.iter().map(role_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    pub async fn find_role(&self, id: Uuid) -> Result<Option<Role>, RoleStoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    pub async fn get_role(&self, id: Uuid) -> Result<Role, RoleStoreError> {
        self.find_role(id).await?.ok_or(RoleStoreError::RoleNotFound(id))
    }

    pub async fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
        permissions: Vec<Permission>,
    ) -> Result<Role, RoleStoreError> {
        let name = validate_name(name)?;
        let permissions = validate_permissions(permissions)?;
        let id = Uuid::new_v4();
        let now = timestamp(Utc::now());

        let result = sqlx::query(
            "INSERT INTO roles (id, name, description, permissions, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&name)
        .bind(description)
        .bind(encode_permissions(&permissions))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(RoleStoreError::DuplicateName(name)),
            Err(err) => return Err(err.into()),
        }

        tracing::info!(role_id = %id, role = %name, "role created");
        self.get_role(id).await
    }

    /// Applies `patch`; a rename is copied onto every user referencing the role.
    pub async fn update_role(&self, id: Uuid, patch: RoleUpdateRequest) -> Result<Role, RoleStoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RoleStoreError::RoleNotFound(id))?;
        let current = role_from_row(&row)?;

        let name = match patch.name.as_deref() {
            Some(name) => validate_name(name)?,
            None => current.name.clone(),
        };
        let description = patch.description.or(current.description);
        let permissions = match patch.permissions {
            Some(permissions) => validate_permissions(permissions)?,
            None => current.permissions,
        };
        let now = timestamp(Utc::now());

        let result = sqlx::query("UPDATE roles SET name = ?, description = ?, permissions = ?, updated_at = ? WHERE id = ?")
            .bind(&name)
            .bind(&description)
            .bind(encode_permissions(&permissions))
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(RoleStoreError::DuplicateName(name)),
            Err(err) => return Err(err.into()),
        }

        if name != current.name {
            sqlx::query("UPDATE users SET role_name = ?, updated_at = ? WHERE role_id = ?")
                .bind(&name)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.get_role(id).await
    }

    pub async fn count_members(&self, id: Uuid) -> Result<i64, RoleStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Removes the role for good. Refused while any user or outstanding
    /// obligation references it.
    pub async fn delete_role(&self, id: Uuid) -> Result<Role, RoleStoreError> {
        let role = self.get_role(id).await?;

        let users = self.count_members(id).await?;
        if users > 0 {
            return Err(RoleStoreError::RoleInUse { role_id: id, users });
        }
        if self.obligations.role_has_obligations(id).await? {
            return Err(RoleStoreError::RoleInUse { role_id: id, users });
        }

        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {}
            // a user was assigned between the count and the delete
            Err(err) if is_foreign_key_violation(&err) => {
                let users = self.count_members(id).await?;
                return Err(RoleStoreError::RoleInUse { role_id: id, users });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(role_id = %id, role = %role.name, "role deleted");
        Ok(role)
    }

    /// Points the user at `role_id` and refreshes the denormalized role name.
    /// The backend role column is left as is.
    pub async fn set_user_role(&self, user_id: Uuid, role_id: Uuid) -> Result<Role, RoleStoreError> {
        let role = self.get_role(role_id).await?;

        let result = sqlx::query("UPDATE users SET role_id = ?, role_name = ?, updated_at = ? WHERE id = ?")
            .bind(role.id.to_string())
            .bind(&role.name)
            .bind(timestamp(Utc::now()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await;

        let result = match result {
            Ok(result) => result,
            // the role was deleted after we read it
            Err(err) if is_foreign_key_violation(&err) => return Err(RoleStoreError::RoleNotFound(role_id)),
            Err(err) => return Err(err.into()),
        };

        if result.rows_affected() == 0 {
            return Err(RoleStoreError::UserNotFound(user_id));
        }

        tracing::info!(user_id = %user_id, role = %role.name, "role assigned");
        Ok(role)
    }
}

fn validate_name(name: &str) -> Result<String, RoleStoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoleStoreError::Invalid("role name must not be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(RoleStoreError::Invalid("role name must be at most 64 characters".to_string()));
    }
    Ok(name.to_string())
}

fn validate_permissions(permissions: Vec<Permission>) -> Result<BTreeSet<Permission>, RoleStoreError> {
    let unknown: Vec<String> = permissions
        .iter()
        .filter(|p| !p.is_known())
        .map(|p| p.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(RoleStoreError::Invalid(format!("unknown permissions: {}", unknown.join(", "))));
    }
    Ok(permissions.into_iter().collect())
}

pub(super) fn encode_permissions(permissions: &BTreeSet<Permission>) -> String {
    let names: Vec<&str> = permissions.iter().map(Permission::as_str).collect();
    serde_json::Value::from(names).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::catalog::permissions;

    #[test]
    fn rejects_unknown_permissions() {
        let err = validate_permissions(vec![
            Permission::from_static(permissions::BOOKS_VIEW),
            Permission::new("books:burn"),
        ])
        .unwrap_err();
        assert!(matches!(err, RoleStoreError::Invalid(msg) if msg.contains("books:burn")));
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(validate_name("  Auditor ").unwrap(), "Auditor");
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn permissions_encode_as_sorted_json_array() {
        let set: BTreeSet<Permission> = [permissions::BOOKS_VIEW, permissions::AUDIT_VIEW]
            .into_iter()
            .map(Permission::from_static)
            .collect();
        assert_eq!(encode_permissions(&set), r#"["audit:view","books:view"]"#);
    }
}
