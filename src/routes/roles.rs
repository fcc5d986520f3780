//! Role administration API
//!
//! Every mutation goes through the audit recorder, denied attempts included.
//! Callers below the administrative role can only hand out permissions they
//! hold themselves.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{AuditAction, AuditSpec, RequestMeta, ResourceType};
use crate::authz::{permissions, MatchMode, Permission, Principal};
use crate::errors::AppError;
use crate::models::role::{PermissionCatalogResponse, Role, RoleCreateRequest, RoleUpdateRequest};

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route("/permissions", get(permission_catalog))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Missing roles:view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, principal: Principal) -> Result<Json<Vec<Role>>, AppError> {
    state.authorize(&principal, &[permissions::ROLES_VIEW], MatchMode::Any)?;
    Ok(Json(state.roles.list_roles().await?))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Unknown permission or invalid name"),
        (status = 403, description = "Missing roles:manage or delegating beyond own grant"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    let meta = meta.with_body(&req);
    let spec = AuditSpec::new(AuditAction::Create, ResourceType::Role)
        .describe(format!("Create role '{}'", req.name))
        .success_status(StatusCode::CREATED);

    let role = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::ROLES_MANAGE], MatchMode::Any)?;
            let granting: BTreeSet<Permission> = req.permissions.iter().cloned().collect();
            state
                .evaluator
                .can_delegate(&principal, &granting, Some(req.name.trim()))?;

            let role = state
                .roles
                .create_role(&req.name, req.description.as_deref(), req.permissions.clone())
                .await?;
            Ok::<_, AppError>(role)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Role>, AppError> {
    state.authorize(&principal, &[permissions::ROLES_VIEW], MatchMode::Any)?;
    Ok(Json(state.roles.get_role(role_id).await?))
}

/// Update a role; renames are propagated to assigned users
#[utoipa::path(
    put,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Path(role_id): Path<Uuid>,
    Json(req): Json<RoleUpdateRequest>,
) -> Result<Json<Role>, AppError> {
    let meta = meta.with_body(&req);
    let spec = AuditSpec::new(AuditAction::Update, ResourceType::Role)
        .resource_id(role_id)
        .describe("Update role");

    let role = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::ROLES_MANAGE], MatchMode::Any)?;

            let current = state.roles.get_role(role_id).await?;
            let granting: BTreeSet<Permission> = match &req.permissions {
                Some(permissions) => permissions.iter().cloned().collect(),
                None => current.permissions.clone(),
            };
            let target_name = req.name.as_deref().map(str::trim).unwrap_or(&current.name);
            state.evaluator.can_delegate(&principal, &granting, Some(target_name))?;
            // renaming the admin role away is as privileged as creating it
            state.evaluator.can_delegate(&principal, &BTreeSet::new(), Some(&current.name))?;

            Ok::<_, AppError>(state.roles.update_role(role_id, req.clone()).await?)
        })
        .await?;

    Ok(Json(role))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/roles/{role_id}",
    tag = "Roles",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role still assigned"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let spec = AuditSpec::new(AuditAction::Delete, ResourceType::Role)
        .resource_id(role_id)
        .describe("Delete role")
        .success_status(StatusCode::NO_CONTENT);

    state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::ROLES_MANAGE], MatchMode::Any)?;
            let role = state.roles.get_role(role_id).await?;
            state.evaluator.can_delegate(&principal, &role.permissions, Some(&role.name))?;
            Ok::<_, AppError>(state.roles.delete_role(role_id).await?)
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

/// Every known permission and the static role table
#[utoipa::path(
    get,
    path = "/permissions",
    tag = "Roles",
    responses(
        (status = 200, description = "Permission catalog", body = PermissionCatalogResponse),
    ),
    security(("bearerAuth" = []))
)]
pub async fn permission_catalog(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<PermissionCatalogResponse>, AppError> {
    state.authorize(&principal, &[permissions::ROLES_VIEW], MatchMode::Any)?;
    Ok(Json(PermissionCatalogResponse::current()))
}
