use std::convert::Infallible;

use axum::async_trait;
use axum::extract::{FromRequestParts, OriginalUri};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;

const MASK: &str = "***";
const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "secret", "authorization", "api_key"];

/// Request facts copied onto an audit entry (method, path, IP, User-Agent,
/// and the body for mutating methods).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMeta {
    pub method: Option<String>,
    /// Path only; query strings are never stored.
    pub endpoint: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub payload: Option<Value>,
}

impl RequestMeta {
    pub fn new(method: &Method, path: impl Into<String>, headers: &HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self {
            method: Some(method.as_str().to_string()),
            endpoint: Some(path.into()),
            ip,
            user_agent,
            payload: None,
        }
    }

    pub fn retains_body(&self) -> bool {
        matches!(self.method.as_deref(), Some("POST" | "PUT" | "PATCH"))
    }

    /// Keeps a masked copy of `body` when the method mutates state; otherwise a no-op.
    pub fn with_body<T: Serialize>(mut self, body: &T) -> Self {
        if !self.retains_body() {
            return self;
        }
        match serde_json::to_value(body) {
            Ok(mut value) => {
                redact(&mut value);
                self.payload = Some(value);
            }
            Err(err) => tracing::debug!(error = %err, "request body not serializable for audit"),
        }
        self
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

/// Masks credential-like keys at any depth.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive(key) {
                    *inner = Value::String(MASK.to_string());
                } else {
                    redact(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // nested routers see a stripped path
        let path = match parts.extensions.get::<OriginalUri>() {
            Some(OriginalUri(uri)) => uri.path().to_string(),
            None => parts.uri.path().to_string(),
        };
        Ok(RequestMeta::new(&parts.method, path, &parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(method: Method) -> RequestMeta {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        RequestMeta::new(&method, "/roles", &headers)
    }

    #[test]
    fn first_forwarded_address_wins() {
        assert_eq!(meta(Method::GET).ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn read_methods_drop_the_body() {
        let get = meta(Method::GET).with_body(&json!({ "q": "secret stuff" }));
        assert!(get.payload.is_none());

        let delete = meta(Method::DELETE).with_body(&json!({ "id": 1 }));
        assert!(delete.payload.is_none());
    }

    #[test]
    fn mutating_methods_keep_a_masked_body() {
        let post = meta(Method::POST).with_body(&json!({
            "username": "ada",
            "password": "hunter22",
            "nested": { "refresh_token": "abc", "keep": true },
            "list": [{ "clientSecret": "x" }]
        }));

        assert_eq!(
            post.payload,
            Some(json!({
                "username": "ada",
                "password": "***",
                "nested": { "refresh_token": "***", "keep": true },
                "list": [{ "clientSecret": "***" }]
            }))
        );
    }
}
