mod common;

use axum::http::StatusCode;
use common::{body_json, header_str, login_request, put, TestApp, PASSWORD};
use serde_json::json;

const BAD_PASSWORD: &str = "N0t!ThePassword";

async fn fail_login(app: &TestApp, ip: &str, times: usize) {
    for _ in 0..times {
        let res = app.send(login_request("viewer", BAD_PASSWORD, ip)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_ip_locked_after_max_failures() {
    let app = TestApp::spawn().await;
    let ip = "198.51.100.20";

    fail_login(&app, ip, 3).await;

    // Even the right password is refused while locked
    let res = app.send(login_request("viewer", PASSWORD, ip)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header_str(&res, "retry-after").is_some());

    let body = body_json(res).await;
    assert_eq!(
        body["error"]["message"],
        "Too many failed login attempts. Try again later."
    );
    assert!(body["error"]["details"]["reset"].is_i64());
}

#[tokio::test]
async fn test_lockout_is_per_ip() {
    let app = TestApp::spawn().await;

    fail_login(&app, "198.51.100.21", 3).await;

    let res = app
        .send(login_request("viewer", PASSWORD, "198.51.100.22"))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_successful_login_resets_failure_count() {
    let app = TestApp::spawn().await;
    let ip = "198.51.100.23";

    fail_login(&app, ip, 2).await;
    let res = app.send(login_request("viewer", PASSWORD, ip)).await;
    assert_eq!(res.status(), StatusCode::OK);

    fail_login(&app, ip, 2).await;
    let res = app.send(login_request("viewer", PASSWORD, ip)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_whitelisting_lifts_and_prevents_lockout() {
    let app = TestApp::spawn().await;
    let ip = "198.51.100.24";
    let (root, _) = app.login("root").await;

    fail_login(&app, ip, 3).await;
    let res = app.send(login_request("viewer", PASSWORD, ip)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let res = app
        .send(put(
            &format!("/api/admin/ip-blocks/{}", ip),
            Some(&root),
            json!({ "whitelisted": true }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"]["is_whitelisted"], true);
    assert_eq!(body["data"]["failed_attempts"], 0);

    fail_login(&app, ip, 5).await;
    let res = app.send(login_request("viewer", PASSWORD, ip)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_whitelist_rejects_malformed_ip() {
    let app = TestApp::spawn().await;
    let (root, _) = app.login("root").await;

    let res = app
        .send(put(
            "/api/admin/ip-blocks/not-an-ip",
            Some(&root),
            json!({ "whitelisted": true }),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
