use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::principal::Principal;
use crate::app::AppState;
use crate::db::users::fetch_user_by_id;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::models::user::UserStatus;
use crate::roles::RoleStore;

/// Why a request could not be tied to an active account.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid bearer credential (expired: {expired})")]
    InvalidCredential { expired: bool },
    #[error("token subject {0} does not exist")]
    UnknownSubject(Uuid),
    #[error("account {0} is not active")]
    InactiveAccount(Uuid),
    #[error("identity lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
}

impl AuthError {
    /// What the caller is told. Only expiry is distinguishable; the other
    /// cases read the same so accounts cannot be probed.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential { expired: true } => "token expired",
            _ => "not authenticated",
        }
    }
}

/// Turns a bearer token into a [`Principal`] snapshot.
///
/// Verification is local (HMAC), so resolution costs one user lookup and at
/// most one role lookup. Nothing is written.
#[derive(Clone)]
pub struct IdentityResolver {
    jwt: JwtConfig,
    pool: SqlitePool,
    roles: RoleStore,
}

impl IdentityResolver {
    pub fn new(jwt: JwtConfig, pool: SqlitePool, roles: RoleStore) -> Self {
        Self { jwt, pool, roles }
    }

    pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = Self::bearer_token(headers).ok_or(AuthError::MissingCredential)?;
        self.resolve_token(token).await
    }

    pub async fn resolve_token(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.jwt.decode(token)?;

        let user = fetch_user_by_id(&self.pool, claims.sub)
            .await
            .map_err(lookup_error)?
            .ok_or(AuthError::UnknownSubject(claims.sub))?;

        let status = user.status();
        if status != UserStatus::Active {
            tracing::debug!(user_id = %user.id, status = %status, "inactive account presented a token");
            return Err(AuthError::InactiveAccount(user.id));
        }

        let mut principal = Principal::new(user.id, user.backend_role.clone())
            .with_username(user.username.clone())
            .with_status(status);

        if let Some(role_id) = user.role_id {
            match self.roles.find_role(role_id).await.map_err(|err| lookup_error(err.into()))? {
                Some(role) => principal = principal.with_persisted_role(role.name, role.permissions),
                // dangling reference: fall back to the static grant only
                None => tracing::warn!(user_id = %user.id, role_id = %role_id, "user references a missing role"),
            }
        }

        Ok(principal)
    }
}

fn lookup_error(err: AppError) -> AuthError {
    match err {
        AppError::Database(err) => AuthError::Lookup(err),
        other => AuthError::Lookup(sqlx::Error::Decode(Box::new(other))),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = state.identity.resolve(&parts.headers).await?;
        Ok(principal)
    }
}
