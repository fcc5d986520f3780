//! Reconciles the `roles` table with the canonical role set.
//!
//! Safe to run on every start: the write set is computed from what is already
//! stored, and inserts skip names that appeared in the meantime. A `roles`
//! table left by an older layout (keyed on another column, or lacking the
//! expected columns) is rebuilt before seeding.

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::store::encode_permissions;
use super::RoleStoreError;
use crate::authz::catalog::StaticRole;
use crate::db::timestamp;
use crate::models::role::NewRole;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Why the table was rebuilt, when it was.
    pub rebuilt: Option<String>,
    pub dropped_indexes: Vec<String>,
    pub created: Vec<String>,
}

/// Canonical roles missing from `existing`, in canonical order.
pub fn plan_canonical_roles<S: AsRef<str>>(existing: &[S]) -> Vec<NewRole> {
    StaticRole::CANONICAL
        .iter()
        .filter(|role| !existing.iter().any(|name| name.as_ref() == role.as_str()))
        .map(|role| NewRole::canonical(*role))
        .collect()
}

const ROLE_COLUMNS: [&str; 6] = ["id", "name", "description", "permissions", "created_at", "updated_at"];

const CREATE_REBUILT_ROLES: &str = "CREATE TABLE roles_rebuilt (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    permissions TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CONSTRAINT roles_name_unique UNIQUE (name)
)";

async fn index_columns(pool: &SqlitePool, index_name: &str) -> Result<Vec<String>, RoleStoreError> {
    let columns = sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
        .bind(index_name)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

/// Describes what makes the stored `roles` table unusable, or `None` when it
/// has the expected columns and is keyed on `name` alone.
///
/// Standalone unique indexes on other columns are not reported here; they can
/// be dropped without touching the table.
pub async fn incompatible_roles_layout(pool: &SqlitePool) -> Result<Option<String>, RoleStoreError> {
    let columns = sqlx::query(r#"SELECT name, "notnull", dflt_value FROM pragma_table_info('roles')"#)
        .fetch_all(pool)
        .await?;
    if columns.is_empty() {
        return Ok(None);
    }

    let mut names = Vec::with_capacity(columns.len());
    for column in &columns {
        let name: String = column.try_get("name")?;
        let not_null: i64 = column.try_get("notnull")?;
        let default: Option<String> = column.try_get("dflt_value")?;
        if !ROLE_COLUMNS.contains(&name.as_str()) && not_null == 1 && default.is_none() {
            return Ok(Some(format!("required column {name} is not part of the role layout")));
        }
        names.push(name);
    }
    if let Some(missing) = ROLE_COLUMNS.iter().find(|c| !names.iter().any(|n| n == *c)) {
        return Ok(Some(format!("missing column {missing}")));
    }

    let indexes = sqlx::query(r#"SELECT name, origin FROM pragma_index_list('roles') WHERE "unique" = 1"#)
        .fetch_all(pool)
        .await?;
    let mut name_is_unique = false;
    for index in indexes {
        let index_name: String = index.try_get("name")?;
        let origin: String = index.try_get("origin")?;
        let columns = index_columns(pool, &index_name).await?;
        if columns == ["name"] {
            name_is_unique = true;
        } else if origin == "u" {
            return Ok(Some(format!("unique constraint on ({})", columns.join(", "))));
        }
    }
    if !name_is_unique {
        return Ok(Some("name is not unique".to_string()));
    }

    Ok(None)
}

fn text(row: &SqliteRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column).ok().flatten()
}

/// Replaces the `roles` table with the current layout, carrying over every
/// legacy row that has a name. Returns how many rows were kept.
///
/// Ids that are not UUIDs are reissued; so are malformed permission lists,
/// which become empty. Foreign-key enforcement is off for the duration so
/// `users.role_id` keeps pointing at the carried ids.
pub async fn rebuild_roles_table(pool: &SqlitePool) -> Result<u64, RoleStoreError> {
    let mut conn = pool.acquire().await?;
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    let result = copy_into_rebuilt_table(&mut conn).await;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
    result
}

async fn copy_into_rebuilt_table(conn: &mut SqliteConnection) -> Result<u64, RoleStoreError> {
    let legacy = sqlx::query("SELECT * FROM roles").fetch_all(&mut *conn).await?;
    let now = timestamp(Utc::now());

    let mut tx = conn.begin().await?;
    sqlx::query("DROP TABLE IF EXISTS roles_rebuilt").execute(&mut *tx).await?;
    sqlx::query(CREATE_REBUILT_ROLES).execute(&mut *tx).await?;

    let mut kept = 0;
    for row in &legacy {
        let Some(name) = text(row, "name").filter(|name| !name.trim().is_empty()) else {
            continue;
        };
        let id = text(row, "id")
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .unwrap_or_else(Uuid::new_v4);
        let permissions = text(row, "permissions")
            .filter(|raw| serde_json::from_str::<Vec<String>>(raw).is_ok())
            .unwrap_or_else(|| "[]".to_string());

        let result = sqlx::query(
            "INSERT INTO roles_rebuilt (id, name, description, permissions, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(text(row, "description"))
        .bind(permissions)
        .bind(text(row, "created_at").unwrap_or_else(|| now.clone()))
        .bind(text(row, "updated_at").unwrap_or_else(|| now.clone()))
        .execute(&mut *tx)
        .await?;
        kept += result.rows_affected();
    }

    sqlx::query("DROP TABLE roles").execute(&mut *tx).await?;
    sqlx::query("ALTER TABLE roles_rebuilt RENAME TO roles").execute(&mut *tx).await?;
    tx.commit().await?;

    let discarded = legacy.len() as u64 - kept;
    if discarded > 0 {
        tracing::warn!(discarded, "legacy roles without a usable name were not carried over");
    }
    Ok(kept)
}

/// Drops unique indexes left over from a layout that keyed roles on
/// something other than `name`. Constraint-backed indexes are kept.
pub async fn drop_legacy_role_indexes(pool: &SqlitePool) -> Result<Vec<String>, RoleStoreError> {
    let indexes = sqlx::query(
        r#"SELECT name FROM pragma_index_list('roles') WHERE "unique" = 1 AND origin = 'c'"#,
    )
    .fetch_all(pool)
    .await?;

    let mut dropped = Vec::new();
    for index in indexes {
        let index_name: String = index.try_get("name")?;
        let columns = index_columns(pool, &index_name).await?;

        if columns == ["name"] {
            continue;
        }

        let statement = format!(r#"DROP INDEX IF EXISTS "{}""#, index_name.replace('"', "\"\""));
        sqlx::query(&statement).execute(pool).await?;
        tracing::warn!(index = %index_name, columns = ?columns, "dropped legacy unique index on roles");
        dropped.push(index_name);
    }

    Ok(dropped)
}

pub async fn ensure_canonical_roles(pool: &SqlitePool) -> Result<SeedReport, RoleStoreError> {
    let rebuilt = incompatible_roles_layout(pool).await?;
    if let Some(reason) = &rebuilt {
        let kept = rebuild_roles_table(pool).await?;
        tracing::warn!(reason = %reason, kept, "rebuilt roles table from a legacy layout");
    }

    let dropped_indexes = drop_legacy_role_indexes(pool).await?;

    let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM roles")
        .fetch_all(pool)
        .await?;

    let mut created = Vec::new();
    for role in plan_canonical_roles(&existing) {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO roles (id, name, description, permissions, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&role.name)
        .bind(&role.description)
        .bind(encode_permissions(&role.permissions))
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            created.push(role.name);
        }
    }

    if !created.is_empty() {
        tracing::info!(created = ?created, "seeded canonical roles");
    }

    Ok(SeedReport {
        rebuilt,
        dropped_indexes,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn bare_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn memory_pool() -> SqlitePool {
        let pool = bare_pool().await;
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    /// Starts from `legacy_ddl` instead of the current layout, then migrates.
    async fn legacy_pool(legacy_ddl: &str, rows: &[&str]) -> SqlitePool {
        let pool = bare_pool().await;
        sqlx::query(legacy_ddl).execute(&pool).await.unwrap();
        for row in rows {
            sqlx::query(row).execute(&pool).await.unwrap();
        }
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    #[test]
    fn plans_only_missing_roles() {
        let plan = plan_canonical_roles(&["Staff", "Auditor"]);
        let names: Vec<&str> = plan.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Admin", "User"]);
        assert_eq!(plan[0].permissions, StaticRole::Admin.permissions());
    }

    #[test]
    fn plans_nothing_when_complete() {
        assert!(plan_canonical_roles(&["Admin", "Staff", "User"]).is_empty());
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let pool = memory_pool().await;

        let first = ensure_canonical_roles(&pool).await.unwrap();
        assert_eq!(first.created, vec!["Admin", "Staff", "User"]);

        let second = ensure_canonical_roles(&pool).await.unwrap();
        assert!(second.created.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn drops_unique_index_on_other_columns() {
        let pool = memory_pool().await;
        sqlx::query("CREATE UNIQUE INDEX roles_description_unique ON roles(description)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE UNIQUE INDEX roles_name_ci ON roles(name)")
            .execute(&pool)
            .await
            .unwrap();

        let report = ensure_canonical_roles(&pool).await.unwrap();
        assert_eq!(report.dropped_indexes, vec!["roles_description_unique"]);
        assert_eq!(report.created.len(), 3);
    }

    #[tokio::test]
    async fn current_layout_is_left_alone() {
        let pool = memory_pool().await;
        assert_eq!(incompatible_roles_layout(&pool).await.unwrap(), None);

        let report = ensure_canonical_roles(&pool).await.unwrap();
        assert_eq!(report.rebuilt, None);
    }

    #[tokio::test]
    async fn table_keyed_on_another_column_is_rebuilt() {
        let pool = legacy_pool(
            "CREATE TABLE roles (role_key TEXT NOT NULL UNIQUE, label TEXT)",
            &["INSERT INTO roles (role_key, label) VALUES ('librarian', 'Librarian')"],
        )
        .await;
        assert!(incompatible_roles_layout(&pool).await.unwrap().is_some());

        let report = ensure_canonical_roles(&pool).await.unwrap();
        assert!(report.rebuilt.is_some());
        assert_eq!(report.created, vec!["Admin", "Staff", "User"]);

        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('roles')")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(!columns.iter().any(|c| c == "role_key"));
        assert_eq!(incompatible_roles_layout(&pool).await.unwrap(), None);

        let duplicate = sqlx::query(
            "INSERT INTO roles (id, name, permissions, created_at, updated_at) VALUES ('x', 'Admin', '[]', '', '')",
        )
        .execute(&pool)
        .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn named_legacy_rows_survive_the_rebuild() {
        let staff_id = Uuid::new_v4();
        let legacy_row = format!(
            "INSERT INTO roles (id, code, name, permissions, created_at, updated_at) \
             VALUES ('{staff_id}', 'ctv', 'Staff', '[\"books:view\"]', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')"
        );
        let pool = legacy_pool(
            "CREATE TABLE roles (
                id TEXT PRIMARY KEY NOT NULL,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT,
                permissions TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            &[legacy_row.as_str()],
        )
        .await;
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role_id, role_name, created_at, updated_at) \
             VALUES ('u1', 'desk', 'desk@example.com', 'x', ?, 'Staff', '', '')",
        )
        .bind(staff_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

        let report = ensure_canonical_roles(&pool).await.unwrap();
        assert_eq!(report.rebuilt.as_deref(), Some("required column code is not part of the role layout"));
        assert_eq!(report.created, vec!["Admin", "User"]);

        let (id, permissions): (String, String) = sqlx::query_as("SELECT id, permissions FROM roles WHERE name = 'Staff'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(id, staff_id.to_string());
        assert_eq!(permissions, r#"["books:view"]"#);

        let dangling: Vec<(String,)> = sqlx::query_as("SELECT \"table\" FROM pragma_foreign_key_check")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(dangling.is_empty());
    }
}
