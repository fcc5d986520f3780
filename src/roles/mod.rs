//! Persisted roles: CRUD, user assignment and canonical seeding.

mod seed;
mod store;

pub use seed::{
    drop_legacy_role_indexes, ensure_canonical_roles, incompatible_roles_layout, plan_canonical_roles, rebuild_roles_table,
    SeedReport,
};
pub use store::RoleStore;

use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, thiserror::Error)]
pub enum RoleStoreError {
    #[error("role '{0}' already exists")]
    DuplicateName(String),
    #[error("role {0} not found")]
    RoleNotFound(Uuid),
    #[error("role {role_id} is still in use ({users} user(s) reference it)")]
    RoleInUse { role_id: Uuid, users: i64 },
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AppError> for RoleStoreError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::Database(err) => RoleStoreError::Database(err),
            // row parse failures surface as decode errors
            other => RoleStoreError::Database(sqlx::Error::Decode(Box::new(other))),
        }
    }
}
