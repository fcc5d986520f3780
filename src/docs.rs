use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{audit, authz, models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::roles::list_roles,
		routes::roles::create_role,
		routes::roles::get_role,
		routes::roles::update_role,
		routes::roles::delete_role,
		routes::roles::permission_catalog,
		routes::users::set_user_role,
		routes::users::bulk_users,
		routes::audit::list_audit_logs,
		routes::audit::audit_statistics,
		routes::audit::audit_logs_for_user,
		routes::audit::purge_audit_logs
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::auth::MessageResponse,
			routes::audit::PurgeRequest,
			models::user::UserStatus,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::MeResponse,
			models::user::SetUserRoleRequest,
			models::user::BulkAction,
			models::user::BulkUserRequest,
			models::user::BulkUserOutcome,
			models::user::BulkUserResponse,
			models::role::Role,
			models::role::RoleCreateRequest,
			models::role::RoleUpdateRequest,
			models::role::RoleAssignment,
			models::role::CatalogRoleEntry,
			models::role::PermissionCatalogResponse,
			authz::Principal,
			authz::Permission,
			authz::StaticRole,
			authz::BackendRole,
			authz::MatchMode,
			audit::AuditAction,
			audit::ResourceType,
			audit::OutcomeStatus,
			audit::Actor,
			audit::RecordShape,
			audit::AuditLogEntry,
			audit::DateRange,
			audit::AuditPage,
			audit::ActionCount,
			audit::ActorCount,
			audit::DailyActivity,
			audit::AuditStatistics,
			audit::PurgeReport
		)
	),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Auth", description = "Registration, login and identity"),
		(name = "Roles", description = "Persisted roles and the permission catalog"),
		(name = "Users", description = "Role assignment and bulk account actions"),
		(name = "Audit", description = "Audit trail queries, statistics and retention")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc)?;
	add_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc = Arc::new(doc);
	let json_route = get(move || {
		let doc = Arc::clone(&doc);
		async move { Json((*doc).clone()) }
	});

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) -> anyhow::Result<()> {
	let root = doc
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("OpenAPI root must be an object"))?;

	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("components must be an object"))?;

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("securitySchemes must be an object"))?;

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);

	Ok(())
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_response_examples(operation);
				}
			}
		}
	}
}

fn schema_example(reference: &str) -> Option<Value> {
	match reference {
		"#/components/schemas/Role" => Some(json!({
			"id": "6f1c1f62-3d7b-4f0e-9a39-2d4a8a3e5b10",
			"name": "Staff",
			"description": "Circulation desk staff",
			"permissions": ["books:view", "borrows:approve", "borrows:return", "users:view"],
			"created_at": "2026-01-05T09:00:00Z",
			"updated_at": "2026-01-05T09:00:00Z"
		})),
		"#/components/schemas/AuditPage" => Some(json!({
			"items": [{
				"id": "0d3f5c9e-7a21-4b8f-8f0c-3b3a6c1d2e44",
				"action": "LOGIN",
				"resource_type": "AUTH",
				"resource_id": "8a6e0f0b-2c1d-4e5f-9a7b-1c2d3e4f5a6b",
				"actor": {"id": "8a6e0f0b-2c1d-4e5f-9a7b-1c2d3e4f5a6b", "username": "librarian", "role": "Staff"},
				"status": "SUCCESS",
				"success": true,
				"method": "POST",
				"endpoint": "/auth/login",
				"status_code": 200,
				"duration_ms": 42,
				"details": {},
				"timestamp": "2026-01-05T09:01:00Z",
				"created_at": "2026-01-05T09:01:00Z",
				"shape": "nested"
			}],
			"total": 1,
			"page": 1,
			"page_size": 20
		})),
		"#/components/schemas/PurgeReport" => Some(json!({
			"days": 90,
			"cutoff": "2025-10-07T09:00:00Z",
			"deleted": 128
		})),
		_ => None,
	}
}

fn apply_response_examples(operation: &mut Value) {
	let Some(responses) = operation.get_mut("responses").and_then(Value::as_object_mut) else {
		return;
	};

	for response in responses.values_mut() {
		let Some(app_json) = response
			.get_mut("content")
			.and_then(|content| content.get_mut("application/json"))
			.and_then(Value::as_object_mut)
		else {
			continue;
		};

		if app_json.contains_key("example") {
			continue;
		}

		let example = app_json
			.get("schema")
			.and_then(|schema| schema.get("$ref"))
			.and_then(Value::as_str)
			.and_then(schema_example);

		if let Some(example) = example {
			app_json.insert("example".to_string(), example);
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	// https when the server will terminate TLS itself
	let tls_enabled = std::env::var("TLS_CERT_PATH").is_ok() && std::env::var("TLS_KEY_PATH").is_ok();
	let scheme = if tls_enabled { "https" } else { "http" };
	let server_url = format!("{}://localhost:{}", scheme, port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
