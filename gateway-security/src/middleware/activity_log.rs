use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::header,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Instant;

use crate::middleware::pipeline::{Middleware, Next};
use crate::models::{ActionType, AuthenticatedUser, NewActivityEntry, MAX_USER_AGENT_LEN};
use crate::services::store::ActivityStore;
use crate::utils::{client_ip, user_agent};

/// Largest request body buffered for the audit trail. Matches the default
/// limit of axum's `Json` extractor.
pub const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;

/// Payloads above this size are audited without their body.
pub const MAX_LOGGED_PAYLOAD: usize = 16 * 1024;

const MAX_PATH_LEN: usize = 2048;

pub const REDACTED: &str = "[REDACTED]";

/// Body fields never written to the audit trail, at any depth.
const SECRET_FIELDS: [&str; 5] = [
    "password",
    "password_confirmation",
    "current_password",
    "refresh_token",
    "token",
];

/// Writes one audit row per mutating request. Reads are only recorded on
/// admin routes. Must run after [`super::AuthMiddleware`]; a failed write is
/// logged and never changes the response.
pub struct ActivityLogMiddleware {
    store: Arc<dyn ActivityStore>,
    admin: bool,
}

impl ActivityLogMiddleware {
    pub fn new(store: Arc<dyn ActivityStore>, admin: bool) -> Self {
        Self { store, admin }
    }
}

#[async_trait]
impl Middleware for ActivityLogMiddleware {
    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let Some(principal) = req.extensions().get::<AuthenticatedUser>().cloned() else {
            return next.run(req).await;
        };

        let action = ActionType::from_method(req.method().as_str());
        if action == ActionType::Read && !self.admin {
            return next.run(req).await;
        }

        let method = req.method().to_string();
        let path: String = req.uri().path().chars().take(MAX_PATH_LEN).collect();
        let ip_address = client_ip(&req);
        let agent: String = user_agent(&req).chars().take(MAX_USER_AGENT_LEN).collect();

        let (req, request_payload) = if action == ActionType::Read {
            (req, None)
        } else {
            match capture_payload(req).await {
                Ok(captured) => captured,
                Err(response) => return response,
            }
        };

        let started = Instant::now();
        let res = next.run(req).await;
        let response_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let (resource_type, resource_id) = resource_of(&path);
        let entry = NewActivityEntry {
            user_id: principal.id(),
            impersonated_by: principal.impersonated_by,
            action_type: action,
            resource_type,
            resource_id,
            is_admin_action: self.admin,
            ip_address,
            user_agent: agent,
            request_method: method,
            request_path: path,
            request_payload,
            response_status: i32::from(res.status().as_u16()),
            response_time_ms,
        };

        if let Err(e) = self.store.record_activity(entry).await {
            tracing::warn!(
                user_id = principal.id(),
                error = %e,
                "Failed to record activity"
            );
        }
        res
    }
}

/// Buffer the body so it can be both audited and handed on. Only JSON
/// bodies are kept as payload.
async fn capture_payload(req: Request) -> Result<(Request, Option<Value>), Response> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|_| AppError::invalid_request("Request body is too large.").into_response())?;

    let payload = if is_json && !bytes.is_empty() && bytes.len() <= MAX_LOGGED_PAYLOAD {
        serde_json::from_slice::<Value>(&bytes).ok().map(redact)
    } else {
        None
    };

    Ok((Request::from_parts(parts, Body::from(bytes)), payload))
}

/// Replace every secret field with [`REDACTED`].
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if SECRET_FIELDS.contains(&key.as_str()) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// `/api/[admin/]<type>/<id>/...`. The id is the segment after the type when
/// it carries a digit (numeric ids, IP addresses).
pub fn resource_of(path: &str) -> (Option<String>, Option<String>) {
    let mut segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip_while(|s| *s == "api" || *s == "admin");

    let resource_type = segments.next().map(str::to_string);
    let resource_id = segments
        .next()
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| s.chars().take(255).collect());
    (resource_type, resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_nested_secrets() {
        let redacted = redact(json!({
            "username": "alice",
            "password": "hunter2",
            "profile": { "refresh_token": "abc", "bio": "hi" },
            "items": [{ "token": "t" }]
        }));

        assert_eq!(redacted["username"], "alice");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["profile"]["refresh_token"], REDACTED);
        assert_eq!(redacted["profile"]["bio"], "hi");
        assert_eq!(redacted["items"][0]["token"], REDACTED);
    }

    #[test]
    fn test_resource_of() {
        assert_eq!(
            resource_of("/api/roles/5/permissions/9"),
            (Some("roles".to_string()), Some("5".to_string()))
        );
        assert_eq!(
            resource_of("/api/admin/ip-blocks/10.0.0.1"),
            (Some("ip-blocks".to_string()), Some("10.0.0.1".to_string()))
        );
        assert_eq!(
            resource_of("/api/admin/developer/sync"),
            (Some("developer".to_string()), None)
        );
        assert_eq!(resource_of("/api"), (None, None));
    }
}
