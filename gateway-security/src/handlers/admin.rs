//! Sudo-only operations.

use axum::{
    extract::{Query, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, RequestExt,
};
use serde_json::json;
use service_core::error::AppError;

use super::{json_body, path_param, principal, validated_body};
use crate::dtos::admin::{
    ActivityQuery, ImpersonateRequest, IpWhitelistRequest, RegisterPermissionRequest,
};
use crate::dtos::auth::ResetPasswordRequest;
use crate::dtos::ApiResponse;
use crate::services::ActivityStore;
use crate::utils::{client_ip, user_agent};
use crate::AppState;

pub async fn impersonate(state: AppState, req: Request) -> Result<Response, AppError> {
    let sudo = principal(&req)?;
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: ImpersonateRequest = json_body(req).await?;

    let grant = state
        .auth
        .create_impersonation_token(sudo.id(), body.user_id, &ip, &agent)
        .await?;

    Ok(Json(ApiResponse::ok(grant)).into_response())
}

pub async fn register_permission(state: AppState, req: Request) -> Result<Response, AppError> {
    let body: RegisterPermissionRequest = validated_body(req).await?;
    let permission = state.rbac.register_permission(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Permission registered.", permission)),
    )
        .into_response())
}

pub async fn delete_permission(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let permission_id: i64 = path_param(&mut req).await?;
    state.rbac.delete_permission(permission_id).await?;
    Ok(Json(ApiResponse::with_message("Permission deleted.", ())).into_response())
}

pub async fn sync_developer(state: AppState, _req: Request) -> Result<Response, AppError> {
    let report = state.developer_guard.enforce().await?;
    Ok(Json(ApiResponse::ok(report)).into_response())
}

pub async fn set_ip_whitelist(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let ip: String = path_param(&mut req).await?;
    if ip.parse::<std::net::IpAddr>().is_err() {
        return Err(AppError::invalid_request("Invalid IP address."));
    }
    let body: IpWhitelistRequest = json_body(req).await?;

    let record = state.ip_blocker.set_whitelisted(&ip, body.whitelisted).await?;
    Ok(Json(ApiResponse::ok(record)).into_response())
}

pub async fn reset_password(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let user_id: i64 = path_param(&mut req).await?;
    let body: ResetPasswordRequest = validated_body(req).await?;

    let revoked = state.auth.reset_password(user_id, &body.password).await?;
    Ok(Json(ApiResponse::with_message(
        "Password reset.",
        json!({ "revoked_tokens": revoked }),
    ))
    .into_response())
}

pub async fn activity_log(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let Query(query) = req
        .extract_parts::<Query<ActivityQuery>>()
        .await
        .map_err(|e| AppError::invalid_request(e.body_text()))?;

    let entries = state
        .store
        .list_recent_activity(query.limit())
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(Json(ApiResponse::ok(entries)).into_response())
}
