mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use common::spawn_app;

fn outcome<'a>(body: &'a Value, user: Uuid) -> &'a Value {
    body["results"]
        .as_array()
        .and_then(|results| results.iter().find(|r| r["user_id"] == json!(user)))
        .expect("outcome for user")
}

#[tokio::test]
async fn bulk_deactivate_skips_self_missing_and_privileged_targets() -> Result<()> {
    let t = spawn_app().await?;
    let manager = t.user("manager", "CTV", None).await?;
    let (_, role) = {
        let admin = t.user("root", "Admin", None).await?;
        let admin_token = t.token(admin)?;
        t.send(
            "POST",
            "/roles",
            Some(&admin_token),
            Some(json!({ "name": "Accounts", "permissions": ["users:view", "users:manage"] })),
        )
        .await?
    };
    assert!(role["id"].is_string());
    sqlx::query("UPDATE users SET role_id = ?, role_name = 'Accounts' WHERE id = ?")
        .bind(role["id"].as_str())
        .bind(manager.to_string())
        .execute(&t.pool)
        .await?;
    let token = t.token(manager)?;

    let reader = t.user("reader", "DocGia", None).await?;
    let other_admin = t.user("boss", "Admin", None).await?;
    let ghost = Uuid::new_v4();

    let (status, body) = t
        .send(
            "POST",
            "/users/bulk",
            Some(&token),
            Some(json!({
                "action": "deactivate",
                "user_ids": [reader, reader, manager, other_admin, ghost],
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 1);
    assert_eq!(body["skipped"], 3);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(4));

    assert_eq!(outcome(&body, reader)["applied"], true);
    assert_eq!(outcome(&body, manager)["applied"], false);
    assert_eq!(outcome(&body, other_admin)["applied"], false);
    assert_eq!(outcome(&body, ghost)["reason"], "user not found");

    let status_of = |id: Uuid| {
        let pool = t.pool.clone();
        async move {
            sqlx::query_scalar::<_, String>("SELECT status FROM users WHERE id = ?")
                .bind(id.to_string())
                .fetch_one(&pool)
                .await
        }
    };
    assert_eq!(status_of(reader).await?, "Inactive");
    assert_eq!(status_of(other_admin).await?, "Active");

    let count = t
        .wait_for_audit("action = 'BULK_ACTION' AND resource_type = 'USER' AND status = 'SUCCESS'", 1)
        .await?;
    assert_eq!(count, 1);

    Ok(())
}

#[tokio::test]
async fn bulk_delete_by_admin_removes_accounts() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let token = t.token(admin)?;
    let a = t.user("a", "DocGia", None).await?;
    let b = t.user("b", "CTV", None).await?;

    let (status, body) = t
        .send(
            "POST",
            "/users/bulk",
            Some(&token),
            Some(json!({ "action": "delete", "user_ids": [a, b] })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], 2);

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(&t.pool).await?;
    assert_eq!(left, 1);

    Ok(())
}

#[tokio::test]
async fn empty_batch_and_missing_permission_are_refused() -> Result<()> {
    let t = spawn_app().await?;
    let admin = t.user("root", "Admin", None).await?;
    let admin_token = t.token(admin)?;
    let staff = t.user("desk", "CTV", None).await?;
    let staff_token = t.token(staff)?;

    let (status, _) = t
        .send(
            "POST",
            "/users/bulk",
            Some(&admin_token),
            Some(json!({ "action": "suspend", "user_ids": [] })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .send(
            "POST",
            "/users/bulk",
            Some(&staff_token),
            Some(json!({ "action": "suspend", "user_ids": [admin] })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["required"], json!(["users:manage"]));

    Ok(())
}
