use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{Actor, AuditConfig, AuditLogService, AuditRecorder, AuditStore, AuditWriter};
use crate::authz::{DefaultPolicyEvaluator, IdentityResolver, MatchMode, Permission, PolicyEvaluator, Principal};
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::obligations::{NoObligations, ObligationCheck};
use crate::roles::{self, RoleStore};
use crate::routes::{audit, auth, health, roles as role_routes, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub identity: IdentityResolver,
    pub evaluator: Arc<dyn PolicyEvaluator>,
    pub roles: RoleStore,
    pub audit: AuditRecorder,
    pub audit_logs: AuditLogService,
    pub obligations: Arc<dyn ObligationCheck>,
}

impl AppState {
    /// Fails with 401/403 unless `principal` satisfies `required` under `mode`.
    pub fn authorize(&self, principal: &Principal, required: &[&'static str], mode: MatchMode) -> Result<(), AppError> {
        let required: Vec<Permission> = required.iter().copied().map(Permission::from_static).collect();
        self.evaluator
            .authorize(Some(principal), &required, mode)
            .map_err(AppError::from)
    }

    pub fn actor(principal: &Principal) -> Actor {
        Actor {
            id: Some(principal.user_id),
            username: Some(principal.username.clone()),
            role: Some(
                principal
                    .role_name
                    .clone()
                    .unwrap_or_else(|| principal.frontend_role.to_string()),
            ),
        }
    }
}

/// Collaborators `create_app_with` wires in. `from_env` gives the production set.
pub struct AppOptions {
    pub jwt: JwtConfig,
    pub audit: AuditConfig,
    pub evaluator: Arc<dyn PolicyEvaluator>,
    pub obligations: Arc<dyn ObligationCheck>,
}

impl AppOptions {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            jwt: JwtConfig::from_env()?,
            audit: AuditConfig::from_env()?,
            evaluator: Arc::new(DefaultPolicyEvaluator::new()),
            obligations: Arc::new(NoObligations),
        })
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    create_app_with(pool, AppOptions::from_env()?).await
}

/// Seeds canonical roles, starts the audit writer (and the retention task when
/// configured) and builds the router. Must be called inside a Tokio runtime.
pub async fn create_app_with(pool: SqlitePool, options: AppOptions) -> Result<Router, AppError> {
    let report = roles::ensure_canonical_roles(&pool).await?;
    tracing::debug!(
        created = ?report.created,
        dropped = ?report.dropped_indexes,
        rebuilt = ?report.rebuilt,
        "role reconciliation done"
    );

    let store = AuditStore::new(pool.clone());
    let (recorder, rx) = AuditRecorder::new(store.clone(), options.audit.queue_capacity);
    tokio::spawn(AuditWriter::new(store).run(rx));

    let audit_logs = AuditLogService::new(pool.clone(), recorder.clone());
    if let Some(days) = options.audit.retention_days {
        tracing::info!(days, interval = ?options.audit.purge_interval, "scheduled audit retention enabled");
        audit_logs.clone().spawn_retention_task(days, options.audit.purge_interval);
    }

    let role_store = RoleStore::new(pool.clone(), Arc::clone(&options.obligations));
    let identity = IdentityResolver::new(options.jwt.clone(), pool.clone(), role_store.clone());

    let state = AppState {
        pool,
        jwt: Arc::new(options.jwt),
        identity,
        evaluator: options.evaluator,
        roles: role_store,
        audit: recorder,
        audit_logs,
        obligations: options.obligations,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .merge(role_routes::routes())
        .merge(users::routes())
        .merge(audit::routes())
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
