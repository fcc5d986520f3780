mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::spawn_app;

#[tokio::test]
async fn staff_without_roles_view_is_forbidden_with_required_list() -> Result<()> {
    let t = spawn_app().await?;
    let staff = t.user("desk", "CTV", None).await?;
    let token = t.token(staff)?;

    let (status, body) = t.send("GET", "/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["required"], json!(["roles:view"]));

    Ok(())
}

#[tokio::test]
async fn admin_backend_role_bypasses_every_check() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;

    let (status, body) = t.send("GET", "/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .expect("role list")
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    for canonical in ["Admin", "Staff", "User"] {
        assert!(names.contains(&canonical), "missing seeded role {canonical}");
    }

    let (status, _) = t.send("GET", "/audit-logs", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn persisted_admin_role_also_bypasses() -> Result<()> {
    let t = spawn_app().await?;
    let promoted = t.user("promoted", "DocGia", Some("Admin")).await?;
    let token = t.token(promoted)?;

    let (status, _) = t.send("GET", "/permissions", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn persisted_role_grant_is_unioned_with_static_grant() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let admin_token = t.token(admin)?;
    let reader = t.user("reader", "DocGia", None).await?;
    let reader_token = t.token(reader)?;

    let (status, _) = t.send("GET", "/audit-logs", Some(&reader_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, role) = t
        .send(
            "POST",
            "/roles",
            Some(&admin_token),
            Some(json!({ "name": "Auditor", "permissions": ["audit:view"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().expect("role id").to_string();

    let (status, _) = t
        .send(
            "PUT",
            &format!("/users/{reader}/role"),
            Some(&admin_token),
            Some(json!({ "role_id": role_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    // audit:view from the persisted role
    let (status, _) = t.send("GET", "/audit-logs", Some(&reader_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // books:view from the static DocGia grant still shows up
    let (status, me) = t.send("GET", "/auth/me", Some(&reader_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let permissions = me["permissions"].as_array().expect("permissions");
    assert!(permissions.contains(&json!("audit:view")));
    assert!(permissions.contains(&json!("books:view")));
    assert!(!permissions.contains(&json!("audit:manage")));

    Ok(())
}

#[tokio::test]
async fn unknown_backend_role_gets_the_user_grant() -> Result<()> {
    let t = spawn_app().await?;
    let ghost = t.user("ghost", "Ghost", None).await?;
    let token = t.token(ghost)?;

    let (status, me) = t.send("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["identity"]["frontend_role"], "User");

    let (status, _) = t.send("GET", "/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn denied_attempts_are_audited_as_failures() -> Result<()> {
    let t = spawn_app().await?;
    let staff = t.user("desk", "CTV", None).await?;
    let token = t.token(staff)?;

    let (status, _) = t
        .send("POST", "/roles", Some(&token), Some(json!({ "name": "Sneaky", "permissions": [] })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let count = t
        .wait_for_audit(
            &format!("action = 'CREATE' AND resource_type = 'ROLE' AND status = 'FAILURE' AND status_code = 403 AND json_extract(actor, '$.id') = '{staff}'"),
            1,
        )
        .await?;
    assert_eq!(count, 1);

    Ok(())
}
