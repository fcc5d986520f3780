use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{
    clamp_page_size, AuditAction, AuditFilter, AuditPage, AuditSpec, AuditStatistics, DateRange, PurgeReport,
    RequestMeta, ResourceType,
};
use crate::authz::{permissions, MatchMode, Principal};
use crate::errors::AppError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route("/audit-logs/stats", get(audit_statistics))
        .route("/audit-logs/users/:user_id", get(audit_logs_for_user))
        .route("/audit-logs/purge", post(purge_audit_logs))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditListQuery {
    /// Actor user id; matches both stored shapes.
    pub actor: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// 1-based.
    pub page: Option<u32>,
    /// Clamped to 1..=100, default 20.
    pub page_size: Option<u32>,
}

impl AuditListQuery {
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            actor: self.actor,
            action: self.action.clone(),
            resource_type: self.resource_type.clone(),
            success: self.success,
            range: DateRange {
                from: self.from,
                to: self.to,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurgeRequest {
    /// Entries older than this many days are deleted. Must be at least 1.
    #[schema(example = 90)]
    pub days: i64,
}

#[utoipa::path(
    get,
    path = "/audit-logs",
    tag = "Audit",
    params(AuditListQuery),
    responses(
        (status = 200, description = "Page of audit entries, newest first", body = AuditPage),
        (status = 403, description = "Missing audit:view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<AuditPage>, AppError> {
    let spec = AuditSpec::new(AuditAction::Read, ResourceType::AuditLog).describe("List audit logs");

    let page = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            state.authorize(&principal, &[permissions::AUDIT_VIEW], MatchMode::Any)?;
            let page = state
                .audit_logs
                .list(&query.filter(), query.page.unwrap_or(1), clamp_page_size(query.page_size))
                .await?;
            Ok::<_, AppError>(page)
        })
        .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/audit-logs/stats",
    tag = "Audit",
    params(
        ("from" = Option<DateTime<Utc>>, Query, description = "Inclusive lower bound"),
        ("to" = Option<DateTime<Utc>>, Query, description = "Inclusive upper bound"),
    ),
    responses(
        (status = 200, description = "Aggregates over the range", body = AuditStatistics),
        (status = 403, description = "Missing audit:view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn audit_statistics(
    State(state): State<AppState>,
    principal: Principal,
    Query(range): Query<DateRange>,
) -> Result<Json<AuditStatistics>, AppError> {
    state.authorize(&principal, &[permissions::AUDIT_VIEW], MatchMode::Any)?;
    Ok(Json(state.audit_logs.statistics(&range).await?))
}

#[utoipa::path(
    get,
    path = "/audit-logs/users/{user_id}",
    tag = "Audit",
    params(
        ("user_id" = Uuid, Path, description = "Actor user ID"),
        PageQuery,
    ),
    responses(
        (status = 200, description = "Entries performed by the user", body = AuditPage),
        (status = 403, description = "Missing audit:view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn audit_logs_for_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<AuditPage>, AppError> {
    state.authorize(&principal, &[permissions::AUDIT_VIEW], MatchMode::Any)?;
    let page = state
        .audit_logs
        .for_actor(user_id, query.page.unwrap_or(1), clamp_page_size(query.page_size))
        .await?;
    Ok(Json(page))
}

/// Purge entries older than `days`; the purge records its own system entry
#[utoipa::path(
    post,
    path = "/audit-logs/purge",
    tag = "Audit",
    request_body = PurgeRequest,
    responses(
        (status = 200, description = "Purge finished", body = PurgeReport),
        (status = 400, description = "days below 1"),
        (status = 403, description = "Missing audit:manage"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn purge_audit_logs(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<PurgeReport>, AppError> {
    let started = Instant::now();
    let outcome = match state.authorize(&principal, &[permissions::AUDIT_MANAGE], MatchMode::Any) {
        Ok(()) => state
            .audit_logs
            .purge_older_than(req.days, Some(principal.user_id))
            .await
            .map_err(AppError::from),
        Err(err) => Err(err),
    };

    // successful purges are logged by the service as a system entry
    outcome.map(Json).map_err(|err| {
        let spec = AuditSpec::new(AuditAction::Purge, ResourceType::AuditLog)
            .describe("Purge audit logs")
            .details(json!({ "days": req.days }));
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        state
            .audit
            .record_failure(&meta.with_body(&req), AppState::actor(&principal), spec, &err, duration_ms);
        err
    })
}
