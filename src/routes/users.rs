use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    routing::{post, put},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{AuditAction, AuditSpec, RequestMeta, ResourceType};
use crate::authz::{permissions, BackendRole, MatchMode, Principal, StaticRole};
use crate::db::users;
use crate::errors::AppError;
use crate::models::role::RoleAssignment;
use crate::models::user::{BulkAction, BulkUserOutcome, BulkUserRequest, BulkUserResponse, DbUser, SetUserRoleRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/:user_id/role", put(set_user_role))
        .route("/users/bulk", post(bulk_users))
}

/// Assign a persisted role to a user
#[utoipa::path(
    put,
    path = "/users/{user_id}/role",
    tag = "Users",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = SetUserRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = RoleAssignment),
        (status = 403, description = "Missing roles:assign or delegating beyond own grant"),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_user_role(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetUserRoleRequest>,
) -> Result<Json<RoleAssignment>, AppError> {
    let meta = meta.with_body(&req);
    let spec = AuditSpec::new(AuditAction::AssignRole, ResourceType::User)
        .resource_id(user_id)
        .describe("Assign role")
        .details(json!({ "role_id": req.role_id }));

    let assignment = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::ROLES_ASSIGN], MatchMode::Any)?;

            let role = state.roles.get_role(req.role_id).await?;
            state.evaluator.can_delegate(&principal, &role.permissions, Some(&role.name))?;

            let role = state.roles.set_user_role(user_id, req.role_id).await?;
            Ok::<_, AppError>(RoleAssignment { user_id, role })
        })
        .await?;

    Ok(Json(assignment))
}

/// Apply one action to many users
///
/// Users that cannot be acted on are skipped with a reason rather than failing
/// the whole batch.
#[utoipa::path(
    post,
    path = "/users/bulk",
    tag = "Users",
    request_body = BulkUserRequest,
    responses(
        (status = 200, description = "Per-user outcome", body = BulkUserResponse),
        (status = 400, description = "Empty batch"),
        (status = 403, description = "Missing users:manage"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn bulk_users(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Json(req): Json<BulkUserRequest>,
) -> Result<Json<BulkUserResponse>, AppError> {
    let meta = meta.with_body(&req);
    let spec = AuditSpec::new(AuditAction::BulkAction, ResourceType::User)
        .describe(format!("Bulk {} of {} user(s)", req.action.as_str(), req.user_ids.len()));

    let response = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::USERS_MANAGE], MatchMode::Any)?;
            if req.user_ids.is_empty() {
                return Err(AppError::bad_request("user_ids must not be empty"));
            }

            let mut seen = HashSet::new();
            let mut results = Vec::with_capacity(req.user_ids.len());
            for user_id in req.user_ids.iter().copied().filter(|id| seen.insert(*id)) {
                results.push(apply_bulk_action(&state, &principal, user_id, req.action).await?);
            }

            let applied = results.iter().filter(|r| r.applied).count();
            Ok(BulkUserResponse {
                action: req.action,
                applied,
                skipped: results.len() - applied,
                results,
            })
        })
        .await?;

    Ok(Json(response))
}

fn is_admin_account(user: &DbUser) -> bool {
    user.backend_role.parse::<BackendRole>() == Ok(BackendRole::Admin)
        || user.role_name.as_deref() == Some(StaticRole::Admin.as_str())
}

async fn apply_bulk_action(
    state: &AppState,
    principal: &Principal,
    user_id: Uuid,
    action: BulkAction,
) -> Result<BulkUserOutcome, AppError> {
    let skipped = |reason: &str| BulkUserOutcome {
        user_id,
        applied: false,
        reason: Some(reason.to_string()),
    };

    if user_id == principal.user_id {
        return Ok(skipped("cannot apply a bulk action to yourself"));
    }

    let Some(target) = users::fetch_user_by_id(&state.pool, user_id).await? else {
        return Ok(skipped("user not found"));
    };

    if is_admin_account(&target) && !principal.is_admin() {
        return Ok(skipped("insufficient privilege over target account"));
    }

    let applied = match action.target_status() {
        Some(status) => users::update_status(&state.pool, user_id, status).await?,
        None => {
            if state.obligations.user_has_obligations(user_id).await? {
                return Ok(skipped("outstanding borrowings or reservations"));
            }
            users::delete_user(&state.pool, user_id).await?
        }
    };

    if !applied {
        return Ok(skipped("user not found"));
    }

    tracing::info!(user_id = %user_id, action = action.as_str(), by = %principal.user_id, "bulk user action applied");
    Ok(BulkUserOutcome {
        user_id,
        applied: true,
        reason: None,
    })
}
