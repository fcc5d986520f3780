use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::audit::{Actor, AuditAction, AuditSpec, Auditable, RequestMeta, ResourceType};
use crate::authz::{BackendRole, Principal};
use crate::db::users::{self, NewUser};
use crate::errors::{AppError, AppResult};
use crate::models::user::{AuthResponse, LoginRequest, MeResponse, RegisterRequest, User, UserStatus};
use crate::utils::{hash_password, verify_password};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl Auditable for MessageResponse {
    fn audit_message(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid registration data"),
        (status = 409, description = "Username or email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let meta = meta.with_body(&payload);
    let spec = AuditSpec::new(AuditAction::Register, ResourceType::User)
        .describe(format!("Register account '{}'", payload.username))
        .success_status(StatusCode::CREATED);

    let response = state
        .audit
        .wrap(&meta, Actor::anonymous(Some(payload.username.clone())), spec, async {
            let username = payload.username.trim();
            let email = payload.email.trim();
            if username.is_empty() {
                return Err(AppError::bad_request("username must not be empty"));
            }
            if !email.contains('@') {
                return Err(AppError::bad_request("email is not valid"));
            }

            let password_hash = hash_password(&payload.password)?;
            let db_user = users::insert_user(
                &state.pool,
                NewUser {
                    username,
                    email,
                    password_hash: &password_hash,
                    backend_role: BackendRole::default().as_str(),
                    role_id: None,
                    role_name: None,
                },
            )
            .await?;

            let user = User::from(db_user);
            let token = state.jwt.encode(user.id)?;
            Ok(AuthResponse { token, user })
        })
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let meta = meta.with_body(&payload);
    let spec = AuditSpec::new(AuditAction::Login, ResourceType::Auth).describe("Login");

    let response = state
        .audit
        .wrap(&meta, Actor::anonymous(Some(payload.email.clone())), spec, async {
            let db_user = users::fetch_user_by_email(&state.pool, payload.email.trim())
                .await?
                .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

            if !verify_password(&payload.password, &db_user.password_hash)? {
                return Err(AppError::unauthorized("invalid credentials"));
            }

            // same message as a bad password so account state is not disclosed
            if db_user.status() != UserStatus::Active {
                return Err(AppError::unauthorized("invalid credentials"));
            }

            let user = User::from(db_user);
            let token = state.jwt.encode(user.id)?;
            Ok(AuthResponse { token, user })
        })
        .await?;

    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Resolved identity", body = MeResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<MeResponse>> {
    let db_user = users::fetch_user_by_id(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("not authenticated"))?;

    let permissions = principal
        .effective_permissions()
        .into_iter()
        .map(|p| p.to_string())
        .collect();

    Ok(Json(MeResponse {
        user: db_user.into(),
        identity: principal,
        permissions,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Logout acknowledged", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    meta: RequestMeta,
    principal: Principal,
) -> AppResult<Json<MessageResponse>> {
    let spec = AuditSpec::new(AuditAction::Logout, ResourceType::Auth)
        .resource_id(principal.user_id)
        .describe("Logout");

    // tokens are stateless; the client discards its copy
    let response = state
        .audit
        .wrap(&meta, AppState::actor(&principal), spec, async {
            Ok::<_, AppError>(MessageResponse {
                message: "logged out".to_string(),
            })
        })
        .await?;

    Ok(Json(response))
}
