use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;

use super::{json_body, path_param, principal, validated_body};
use crate::dtos::admin::{AssignRoleRequest, CreateRoleRequest, GrantPermissionRequest};
use crate::dtos::auth::CreateUserRequest;
use crate::dtos::ApiResponse;
use crate::AppState;

pub async fn permission_matrix(state: AppState, _req: Request) -> Result<Response, AppError> {
    let matrix = state.rbac.permission_matrix().await?;
    Ok(Json(ApiResponse::ok(matrix)).into_response())
}

pub async fn create_role(state: AppState, req: Request) -> Result<Response, AppError> {
    let body: CreateRoleRequest = validated_body(req).await?;
    let role = state.rbac.create_role(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Role created.", role)),
    )
        .into_response())
}

pub async fn delete_role(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let role_id: i64 = path_param(&mut req).await?;
    state.rbac.delete_role(role_id).await?;
    Ok(Json(ApiResponse::with_message("Role deleted.", ())).into_response())
}

pub async fn grant_permission(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let role_id: i64 = path_param(&mut req).await?;
    let body: GrantPermissionRequest = json_body(req).await?;
    let granted = state
        .rbac
        .grant_permission(role_id, body.permission_id)
        .await?;
    Ok(Json(ApiResponse::ok(json!({ "granted": granted }))).into_response())
}

pub async fn revoke_permission(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let (role_id, permission_id): (i64, i64) = path_param(&mut req).await?;
    let revoked = state.rbac.revoke_permission(role_id, permission_id).await?;
    Ok(Json(ApiResponse::ok(json!({ "revoked": revoked }))).into_response())
}

pub async fn create_user(state: AppState, req: Request) -> Result<Response, AppError> {
    let body: CreateUserRequest = validated_body(req).await?;
    let user = state.auth.create_user(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("User created.", user)),
    )
        .into_response())
}

pub async fn assign_role(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let actor = principal(&req)?;
    let user_id: i64 = path_param(&mut req).await?;
    let body: AssignRoleRequest = json_body(req).await?;
    let assigned = state
        .rbac
        .assign_role(actor.id(), user_id, body.role_id)
        .await?;
    Ok(Json(ApiResponse::ok(json!({ "assigned": assigned }))).into_response())
}

pub async fn remove_role(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let actor = principal(&req)?;
    let (user_id, role_id): (i64, i64) = path_param(&mut req).await?;
    let removed = state.rbac.remove_role(actor.id(), user_id, role_id).await?;
    Ok(Json(ApiResponse::ok(json!({ "removed": removed }))).into_response())
}
