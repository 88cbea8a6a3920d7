//! Shared harness for gateway-security integration tests.
//!
//! Builds the full router over an in-memory store seeded with a root
//! developer, an editor and a viewer, and drives it with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use gateway_security::{
    build_router,
    config::GatewayConfig,
    dtos::auth::CreateUserRequest,
    models::{NewPermission, NewRole, Role, SanitizedUser},
    services::{metrics, CapturingDelivery, MemoryStore, RbacStore},
    AppState,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const PASSWORD: &str = "Str0ng!Passw0rd";
pub const TEST_SECRET: &str = "integration-test-signing-secret-0123456789";
pub const CLIENT_IP: &str = "203.0.113.10";

/// Permission slugs seeded as system permissions.
pub const SEEDED_PERMISSIONS: &[&str] = &[
    "permissions.list",
    "roles.create",
    "roles.delete",
    "roles.update",
    "users.create",
    "users.update",
    "reports.view",
];

/// Granted to the editor role.
pub const EDITOR_PERMISSIONS: &[&str] = &["permissions.list", "roles.create", "reports.view"];

type Overrides =
    fn(ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError>;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    /// Captures self-service reset tokens instead of mailing them.
    pub delivery: Arc<CapturingDelivery>,
    pub root: SanitizedUser,
    pub editor: SanitizedUser,
    pub viewer: SanitizedUser,
    pub editor_role: Role,
}

pub fn test_config(overrides: Overrides) -> GatewayConfig {
    let builder = config::Config::builder()
        .set_override("service_name", "gateway-security-test")
        .unwrap()
        .set_override("jwt.secret", TEST_SECRET)
        .unwrap()
        .set_override("password.cost", 4)
        .unwrap()
        .set_override("lockout.max_attempts", 3)
        .unwrap()
        .set_override("rate_limit.groups.public", 1000)
        .unwrap()
        .set_override("rate_limit.groups.authenticated", 1000)
        .unwrap()
        .set_override("rate_limit.groups.admin", 1000)
        .unwrap();

    let builder = overrides(builder).expect("config overrides should apply");
    GatewayConfig::from_builder(builder).expect("test config should be valid")
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(Ok).await
    }

    pub async fn spawn_with(overrides: Overrides) -> Self {
        metrics::init_metrics().expect("metrics should register");

        let config = test_config(overrides);
        let store = Arc::new(MemoryStore::new());
        let delivery = Arc::new(CapturingDelivery::new());
        let state = AppState::from_store(config, store.clone())
            .expect("state should build")
            .with_reset_delivery(delivery.clone());

        // Root must be the first user so it gets the root principal id.
        let root = create_user(&state, "root").await;
        let editor = create_user(&state, "editor").await;
        let viewer = create_user(&state, "viewer").await;

        for slug in SEEDED_PERMISSIONS {
            store
                .insert_permission(NewPermission {
                    name: slug.to_string(),
                    slug: slug.to_string(),
                    module: "core".to_string(),
                    description: None,
                    is_system: true,
                })
                .await
                .unwrap()
                .expect("seeded permission slug should be free");
        }

        let editor_role = store
            .insert_role(NewRole {
                name: "Editor".to_string(),
                slug: "editor".to_string(),
                description: Some("Manages content roles".to_string()),
                is_system: false,
            })
            .await
            .unwrap()
            .expect("editor slug should be free");

        let permissions = store.list_permissions().await.unwrap();
        for permission in permissions
            .iter()
            .filter(|p| EDITOR_PERMISSIONS.contains(&p.slug.as_str()))
        {
            store
                .grant_permission(editor_role.id, permission.id)
                .await
                .unwrap();
        }
        store.assign_role(editor.id, editor_role.id).await.unwrap();

        state
            .developer_guard
            .enforce()
            .await
            .expect("developer guard should run");

        Self {
            router: build_router(state.clone()),
            state,
            store,
            delivery,
            root,
            editor,
            viewer,
            editor_role,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Log in from [`CLIENT_IP`] and return `(access_token, refresh_token)`.
    pub async fn login(&self, identity: &str) -> (String, String) {
        self.login_from(identity, CLIENT_IP).await
    }

    pub async fn login_from(&self, identity: &str, ip: &str) -> (String, String) {
        let res = self
            .send(login_request(identity, PASSWORD, ip))
            .await;
        assert_eq!(res.status(), StatusCode::OK, "login as {} failed", identity);

        let body = body_json(res).await;
        (
            body["data"]["access_token"].as_str().unwrap().to_string(),
            body["data"]["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    pub async fn permission_id(&self, slug: &str) -> i64 {
        self.store
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.slug == slug)
            .map(|p| p.id)
            .expect("permission should exist")
    }
}

async fn create_user(state: &AppState, username: &str) -> SanitizedUser {
    state
        .auth
        .create_user(CreateUserRequest {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            display_name: None,
            password: PASSWORD.to_string(),
        })
        .await
        .expect("seed user should be created")
}

pub fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
    ip: &str,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, token, None, CLIENT_IP)
}

pub fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    request(Method::POST, uri, token, Some(body), CLIENT_IP)
}

pub fn put(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    request(Method::PUT, uri, token, Some(body), CLIENT_IP)
}

pub fn delete(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::DELETE, uri, token, None, CLIENT_IP)
}

pub fn login_request(identity: &str, password: &str, ip: &str) -> Request<Body> {
    request(
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "identity": identity, "password": password })),
        ip,
    )
}

pub async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}

pub async fn body_text(res: Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
}

pub fn header_str<'a>(res: &'a Response, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}
