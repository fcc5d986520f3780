use serde_json::Value;

#[test]
fn openapi_documents_every_route_and_bearer_auth() -> anyhow::Result<()> {
    let doc = shelfguard::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths must exist");
    for path in [
        "/api/health",
        "/auth/login",
        "/auth/me",
        "/roles",
        "/roles/{role_id}",
        "/permissions",
        "/users/{user_id}/role",
        "/users/bulk",
        "/audit-logs",
        "/audit-logs/stats",
        "/audit-logs/users/{user_id}",
        "/audit-logs/purge",
    ] {
        assert!(paths.contains_key(path), "OpenAPI missing path '{}'", path);
    }

    let scheme = v
        .pointer("/components/securitySchemes/bearerAuth/scheme")
        .and_then(Value::as_str);
    assert_eq!(scheme, Some("bearer"));

    let entry_props = v
        .pointer("/components/schemas/AuditLogEntry/properties")
        .and_then(Value::as_object)
        .expect("components.schemas.AuditLogEntry.properties must exist");
    for k in ["actor", "status", "success", "timestamp", "shape"] {
        assert!(entry_props.contains_key(k), "AuditLogEntry schema missing '{}'", k);
    }

    Ok(())
}
