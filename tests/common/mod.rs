#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;
use uuid::Uuid;

use shelfguard::audit::AuditConfig;
use shelfguard::authz::DefaultPolicyEvaluator;
use shelfguard::db::{self, users};
use shelfguard::jwt::JwtConfig;
use shelfguard::obligations::NoObligations;
use shelfguard::{create_app_with, AppOptions};

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub jwt: JwtConfig,
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("shelfguard_test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    db::migrate(&pool).await?;

    let jwt = JwtConfig::new(SECRET, 1);
    let options = AppOptions {
        jwt: jwt.clone(),
        audit: AuditConfig::default(),
        evaluator: Arc::new(DefaultPolicyEvaluator::new()),
        obligations: Arc::new(NoObligations),
    };
    let app = create_app_with(pool.clone(), options).await?;

    Ok(TestApp {
        app,
        pool,
        jwt,
        _dir: dir,
    })
}

impl TestApp {
    /// Inserts an active user, optionally linked to the persisted role `role_name`.
    pub async fn user(&self, username: &str, backend_role: &str, role_name: Option<&str>) -> Result<Uuid> {
        let role_id = match role_name {
            Some(name) => {
                let id: String = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await
                    .with_context(|| format!("role {name} not seeded"))?;
                Some(Uuid::parse_str(&id)?)
            }
            None => None,
        };

        let email = format!("{username}@example.com");
        let user = users::insert_user(
            &self.pool,
            users::NewUser {
                username,
                email: &email,
                password_hash: "not-a-real-hash",
                backend_role,
                role_id,
                role_name,
            },
        )
        .await?;
        Ok(user.id)
    }

    pub async fn role_id(&self, name: &str) -> Result<Uuid> {
        let id: String = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(Uuid::parse_str(&id)?)
    }

    pub fn token(&self, user_id: Uuid) -> Result<String> {
        Ok(self.jwt.encode(user_id)?)
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Ok((status, json))
    }

    /// Polls until `SELECT COUNT(*) FROM audit_logs WHERE <predicate>` reaches `expected`.
    /// Entries are written by a background task, so they land shortly after the response.
    pub async fn wait_for_audit(&self, predicate: &str, expected: i64) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM audit_logs WHERE {predicate}");
        let mut count = 0;
        for _ in 0..100 {
            count = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?;
            if count >= expected {
                return Ok(count);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(count)
    }
}
