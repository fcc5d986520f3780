mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use shelfguard::authz::{permissions, Permission};
use shelfguard::obligations::NoObligations;
use shelfguard::roles::{RoleStore, RoleStoreError};

use common::spawn_app;

#[tokio::test]
async fn duplicate_role_name_is_a_conflict() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;

    let body = json!({ "name": "Cataloguer", "permissions": ["books:view", "books:edit"] });
    let (status, _) = t.send("POST", "/roles", Some(&token), Some(body.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = t.send("POST", "/roles", Some(&token), Some(body)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");

    Ok(())
}

#[tokio::test]
async fn concurrent_creates_of_one_name_yield_one_role() -> Result<()> {
    let t = spawn_app().await?;
    let store = RoleStore::new(t.pool.clone(), Arc::new(NoObligations));

    let grant = || vec![Permission::from_static(permissions::AUDIT_VIEW)];
    let (a, b) = tokio::join!(
        store.create_role("Auditor", None, grant()),
        store.create_role("Auditor", Some("second writer"), grant()),
    );

    let outcomes = [a, b];
    let created = outcomes.iter().filter(|r| r.is_ok()).count();
    let duplicates = outcomes
        .iter()
        .filter(|r| matches!(r, Err(RoleStoreError::DuplicateName(name)) if name == "Auditor"))
        .count();
    assert_eq!(created, 1);
    assert_eq!(duplicates, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE name = 'Auditor'")
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(count, 1);

    Ok(())
}

#[tokio::test]
async fn unknown_permission_is_rejected() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;

    let (status, _) = t
        .send(
            "POST",
            "/roles",
            Some(&token),
            Some(json!({ "name": "Wizard", "permissions": ["spells:cast"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn assigned_role_cannot_be_deleted() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;
    let member = t.user("member", "DocGia", Some("Staff")).await?;
    let staff_role = t.role_id("Staff").await?;

    let (status, body) = t.send("DELETE", &format!("/roles/{staff_role}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap_or_default().contains("still in use"));

    let (status, _) = t.send("GET", &format!("/roles/{staff_role}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    sqlx::query("UPDATE users SET role_id = NULL, role_name = NULL WHERE id = ?")
        .bind(member.to_string())
        .execute(&t.pool)
        .await?;

    let (status, _) = t.send("DELETE", &format!("/roles/{staff_role}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t.send("GET", &format!("/roles/{staff_role}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn assigning_a_missing_role_or_user_is_not_found() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;
    let target = t.user("target", "DocGia", None).await?;

    let (status, _) = t
        .send(
            "PUT",
            &format!("/users/{target}/role"),
            Some(&token),
            Some(json!({ "role_id": Uuid::new_v4() })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let staff_role = t.role_id("Staff").await?;
    let (status, _) = t
        .send(
            "PUT",
            &format!("/users/{}/role", Uuid::new_v4()),
            Some(&token),
            Some(json!({ "role_id": staff_role })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t
        .send(
            "PUT",
            &format!("/users/{target}/role"),
            Some(&token),
            Some(json!({ "role_id": staff_role })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"]["name"], "Staff");

    let backend: String = sqlx::query_scalar("SELECT backend_role FROM users WHERE id = ?")
        .bind(target.to_string())
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(backend, "DocGia");

    Ok(())
}

#[tokio::test]
async fn rename_is_copied_to_assigned_users() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;

    let (_, role) = t
        .send(
            "POST",
            "/roles",
            Some(&token),
            Some(json!({ "name": "Shelver", "permissions": ["books:view"] })),
        )
        .await?;
    let role_id = role["id"].as_str().expect("role id").to_string();
    let member = t.user("member", "DocGia", Some("Shelver")).await?;

    let (status, renamed) = t
        .send(
            "PUT",
            &format!("/roles/{role_id}"),
            Some(&token),
            Some(json!({ "name": "Stacks Crew" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Stacks Crew");
    assert_eq!(renamed["permissions"], json!(["books:view"]));

    let role_name: Option<String> = sqlx::query_scalar("SELECT role_name FROM users WHERE id = ?")
        .bind(member.to_string())
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(role_name.as_deref(), Some("Stacks Crew"));

    Ok(())
}

#[tokio::test]
async fn delegation_is_capped_at_the_callers_own_grant() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let admin_token = t.token(admin)?;

    let (status, _) = t
        .send(
            "POST",
            "/roles",
            Some(&admin_token),
            Some(json!({ "name": "RoleKeeper", "permissions": ["roles:view", "roles:manage"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let keeper = t.user("keeper", "CTV", Some("RoleKeeper")).await?;
    let token = t.token(keeper)?;

    // audit:manage is not held by CTV nor RoleKeeper
    let (status, body) = t
        .send(
            "POST",
            "/roles",
            Some(&token),
            Some(json!({ "name": "Escalator", "permissions": ["books:view", "audit:manage"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["required"], json!(["audit:manage"]));

    // a subset of what the caller holds is fine
    let (status, _) = t
        .send(
            "POST",
            "/roles",
            Some(&token),
            Some(json!({ "name": "Helper", "permissions": ["books:view", "borrows:return"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    // the administrative role is never editable below admin
    let admin_role = t.role_id("Admin").await?;
    let (status, _) = t
        .send(
            "PUT",
            &format!("/roles/{admin_role}"),
            Some(&token),
            Some(json!({ "name": "Formerly Admin" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
