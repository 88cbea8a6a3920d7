mod common;

use axum::http::StatusCode;
use common::{body_json, get, login_request, post, TestApp, CLIENT_IP, PASSWORD};
use serde_json::json;

#[tokio::test]
async fn test_login_returns_token_pair_and_sanitized_user() {
    let app = TestApp::spawn().await;

    let res = app
        .send(login_request("viewer", PASSWORD, CLIENT_IP))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert_eq!(body["data"]["expires_in"], 900);
    assert!(body["data"]["access_token"].is_string());
    assert!(body["data"]["refresh_token"].is_string());
    assert_eq!(body["data"]["user"]["username"], "viewer");
    assert!(body["data"]["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_login_accepts_email_identity() {
    let app = TestApp::spawn().await;

    let res = app
        .send(login_request("editor@example.com", PASSWORD, CLIENT_IP))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_failures_look_identical() {
    let app = TestApp::spawn().await;

    let wrong_password = app
        .send(login_request("viewer", "Wr0ng!Password", "198.51.100.1"))
        .await;
    let unknown_user = app
        .send(login_request("nobody", PASSWORD, "198.51.100.2"))
        .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);

    let a = body_json(wrong_password).await;
    let b = body_json(unknown_user).await;
    assert_eq!(a["error"], b["error"]);
    assert_eq!(a["error"]["message"], "Invalid credentials.");
}

#[tokio::test]
async fn test_me_reports_principal_and_permissions() {
    let app = TestApp::spawn().await;
    let (access, _) = app.login("editor").await;

    let res = app.send(get("/api/auth/me", Some(&access))).await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["data"]["user"]["username"], "editor");
    assert_eq!(body["data"]["is_sudo"], false);
    assert_eq!(
        body["data"]["permissions"],
        json!(["permissions.list", "reports.view", "roles.create"])
    );
}

#[tokio::test]
async fn test_root_resolves_as_sudo() {
    let app = TestApp::spawn().await;
    let (access, _) = app.login("root").await;

    let body = body_json(app.send(get("/api/auth/me", Some(&access))).await).await;
    assert_eq!(body["data"]["is_sudo"], true);

    let permissions = body["data"]["permissions"].as_array().unwrap();
    assert!(permissions.contains(&json!("*")));
    assert!(permissions.contains(&json!("users.update")));
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_replay() {
    let app = TestApp::spawn().await;
    let (_, refresh) = app.login("viewer").await;

    let res = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    let rotated = body["data"]["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);

    let new_access = body["data"]["access_token"].as_str().unwrap();
    let me = app.send(get("/api/auth/me", Some(new_access))).await;
    assert_eq!(me.status(), StatusCode::OK);

    // The consumed refresh token is single use
    let replay = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // The rotated one still works once
    let again = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": rotated }),
        ))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_types_are_not_interchangeable() {
    let app = TestApp::spawn().await;
    let (access, refresh) = app.login("viewer").await;

    let res = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": access }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app.send(get("/api/auth/me", Some(&refresh))).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_access_and_refresh() {
    let app = TestApp::spawn().await;
    let (access, refresh) = app.login("viewer").await;

    let res = app
        .send(post("/api/auth/logout", Some(&access), json!({})))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let me = app.send(get("/api/auth/me", Some(&access))).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": refresh }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_token_is_unauthorized() {
    let app = TestApp::spawn().await;

    let res = app.send(post("/api/auth/logout", None, json!({}))).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_impersonation_acts_as_target() {
    let app = TestApp::spawn().await;
    let (root_access, _) = app.login("root").await;
    let (_, viewer_refresh) = app.login("viewer").await;

    let res = app
        .send(post(
            "/api/admin/impersonate",
            Some(&root_access),
            json!({ "user_id": app.viewer.id }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert!(body["data"].get("refresh_token").is_none());
    let token = body["data"]["access_token"].as_str().unwrap().to_string();

    let me = body_json(app.send(get("/api/auth/me", Some(&token))).await).await;
    assert_eq!(me["data"]["user"]["username"], "viewer");
    assert_eq!(me["data"]["user"]["impersonated_by"], app.root.id);

    // Ending the impersonation leaves the target's own session alone
    let res = app
        .send(post("/api/auth/logout", Some(&token), json!({})))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .send(post(
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": viewer_refresh }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_impersonating_unknown_user_is_not_found() {
    let app = TestApp::spawn().await;
    let (root_access, _) = app.login("root").await;

    let res = app
        .send(post(
            "/api/admin/impersonate",
            Some(&root_access),
            json!({ "user_id": 9999 }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_password_reset_revokes_sessions() {
    let app = TestApp::spawn().await;
    let (root_access, _) = app.login("root").await;
    let (viewer_access, _) = app.login("viewer").await;

    let weak = app
        .send(post(
            &format!("/api/admin/users/{}/password", app.viewer.id),
            Some(&root_access),
            json!({ "password": "short" }),
        ))
        .await;
    assert_eq!(weak.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = app
        .send(post(
            &format!("/api/admin/users/{}/password", app.viewer.id),
            Some(&root_access),
            json!({ "password": "N3w!Passphrase" }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"]["revoked_tokens"], 2);

    let me = app.send(get("/api/auth/me", Some(&viewer_access))).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    let old = app
        .send(login_request("viewer", PASSWORD, CLIENT_IP))
        .await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    let new = app
        .send(login_request("viewer", "N3w!Passphrase", CLIENT_IP))
        .await;
    assert_eq!(new.status(), StatusCode::OK);
}
