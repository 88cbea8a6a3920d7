mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{body_json, body_text, get, login_request, post, TestApp, CLIENT_IP, PASSWORD};
use gateway_security::{
    models::NewPasswordReset,
    services::{PasswordResetStore, TokenService},
};
use serde_json::{json, Value};

const NEW_PASSWORD: &str = "N3w!Passphrase";

fn reset_body(token: &str, email: &str, password: &str) -> Value {
    json!({
        "token": token,
        "email": email,
        "password": password,
        "password_confirmation": password,
    })
}

async fn request_reset(app: &TestApp, email: &str) -> String {
    let res = app
        .send(post("/api/auth/forgot-password", None, json!({ "email": email })))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    body_text(res).await
}

#[tokio::test]
async fn test_forgot_password_answers_identically() {
    let app = TestApp::spawn().await;

    let known = request_reset(&app, "viewer@example.com").await;
    let unknown = request_reset(&app, "nobody@example.com").await;

    assert_eq!(known, unknown);
    assert_eq!(app.delivery.count(), 1);

    let token = app.delivery.last_token_for(app.viewer.id).unwrap();
    assert_eq!(token.len(), 64);
    assert!(!known.contains(&token));
}

#[tokio::test]
async fn test_reset_with_token_revokes_sessions() {
    let app = TestApp::spawn().await;
    let (access, refresh) = app.login("viewer").await;

    request_reset(&app, "viewer@example.com").await;
    let token = app.delivery.last_token_for(app.viewer.id).unwrap();

    let res = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "viewer@example.com", NEW_PASSWORD),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["data"]["revoked_tokens"], 2);

    let me = app.send(get("/api/auth/me", Some(&access))).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    let res = app
        .send(post("/api/auth/refresh", None, json!({ "refresh_token": refresh })))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let old = app.send(login_request("viewer", PASSWORD, CLIENT_IP)).await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
    let new = app
        .send(login_request("viewer", NEW_PASSWORD, CLIENT_IP))
        .await;
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reset_token_is_single_use() {
    let app = TestApp::spawn().await;
    request_reset(&app, "viewer@example.com").await;
    let token = app.delivery.last_token_for(app.viewer.id).unwrap();

    let first = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "viewer@example.com", NEW_PASSWORD),
        ))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let replay = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "viewer@example.com", "An0ther!Passphrase"),
        ))
        .await;
    assert_eq!(replay.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(replay).await;
    assert_eq!(body["error"]["message"], "Reset token is invalid or expired.");

    let res = app
        .send(login_request("viewer", NEW_PASSWORD, CLIENT_IP))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_reset_token_is_rejected() {
    let app = TestApp::spawn().await;
    let token = "f".repeat(64);
    let issued_at = Utc::now() - Duration::minutes(61);
    app.store
        .insert_password_reset(
            NewPasswordReset {
                user_id: app.viewer.id,
                token_hash: TokenService::hash_token(&token),
                expires_at: issued_at + Duration::hours(1),
                ip_address: None,
            },
            issued_at,
        )
        .await
        .unwrap();

    let res = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "viewer@example.com", NEW_PASSWORD),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = app.send(login_request("viewer", PASSWORD, CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reset_rejects_wrong_email_and_mismatched_confirmation() {
    let app = TestApp::spawn().await;
    request_reset(&app, "viewer@example.com").await;
    let token = app.delivery.last_token_for(app.viewer.id).unwrap();

    let res = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "editor@example.com", NEW_PASSWORD),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = app
        .send(post(
            "/api/auth/reset-password",
            None,
            json!({
                "token": token,
                "email": "viewer@example.com",
                "password": NEW_PASSWORD,
                "password_confirmation": "Different!Pass1",
            }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Neither rejection spent the token
    let res = app
        .send(post(
            "/api/auth/reset-password",
            None,
            reset_body(&token, "viewer@example.com", NEW_PASSWORD),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}
