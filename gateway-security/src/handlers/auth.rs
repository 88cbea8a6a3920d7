use axum::{
    extract::{Query, Request},
    response::{IntoResponse, Response},
    Json, RequestExt,
};
use serde_json::json;
use service_core::error::AppError;

use super::{principal, validated_body};
use crate::dtos::auth::{
    ForgotPasswordRequest, LoginRequest, PermissionCheckQuery, PermissionCheckResponse,
    RefreshRequest, TokenResetRequest,
};
use crate::dtos::ApiResponse;
use crate::middleware::bearer_token;
use crate::utils::{client_ip, user_agent};
use crate::AppState;

pub async fn login(state: AppState, req: Request) -> Result<Response, AppError> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: LoginRequest = validated_body(req).await?;

    let result = state
        .auth
        .login(&body.identity, &body.password, &ip, &agent)
        .await?;

    Ok(Json(ApiResponse::with_message("Login successful.", result)).into_response())
}

pub async fn refresh(state: AppState, req: Request) -> Result<Response, AppError> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: RefreshRequest = validated_body(req).await?;

    let tokens = state.auth.refresh(&body.refresh_token, &ip, &agent).await?;

    Ok(Json(ApiResponse::with_message("Token refreshed.", tokens)).into_response())
}

/// Runs without the auth middleware so an expired token can still log out.
pub async fn logout(state: AppState, req: Request) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(
            "Authentication required. Provide Bearer token in Authorization header.".to_string(),
        )
    })?;

    state.auth.logout(token).await?;

    Ok(Json(ApiResponse::with_message("Logged out.", ())).into_response())
}

/// Same answer whether or not the email is registered. The token only ever
/// leaves through the configured delivery.
pub async fn forgot_password(state: AppState, req: Request) -> Result<Response, AppError> {
    let ip = client_ip(&req);
    let body: ForgotPasswordRequest = validated_body(req).await?;

    state.password_resets.forgot_password(&body.email, &ip).await?;

    Ok(Json(ApiResponse::with_message(
        "If the email is registered, a password reset link has been sent.",
        (),
    ))
    .into_response())
}

pub async fn reset_password_with_token(
    state: AppState,
    req: Request,
) -> Result<Response, AppError> {
    let body: TokenResetRequest = validated_body(req).await?;

    let revoked = state
        .password_resets
        .reset_password_with_token(&body.token, &body.email, &body.password)
        .await?;

    Ok(Json(ApiResponse::with_message(
        "Password has been reset. Please log in again.",
        json!({ "revoked_tokens": revoked }),
    ))
    .into_response())
}

pub async fn me(state: AppState, req: Request) -> Result<Response, AppError> {
    let user = principal(&req)?;
    let permissions = state.permissions.get_user_permissions(user.id()).await?;

    Ok(Json(ApiResponse::ok(json!({
        "user": user,
        "permissions": permissions.as_ref(),
        "is_sudo": permissions.is_sudo(),
    })))
    .into_response())
}

pub async fn check_permissions(state: AppState, mut req: Request) -> Result<Response, AppError> {
    let user = principal(&req)?;
    let Query(query) = req
        .extract_parts::<Query<PermissionCheckQuery>>()
        .await
        .map_err(|e| AppError::invalid_request(e.body_text()))?;

    let slugs = query.slugs();
    if slugs.is_empty() {
        return Err(AppError::invalid_request("At least one permission is required."));
    }

    let set = state.permissions.get_user_permissions(user.id()).await?;
    let response = PermissionCheckResponse {
        granted: set.has_all(&slugs),
        is_sudo: set.is_sudo(),
        permissions: slugs,
    };

    Ok(Json(ApiResponse::ok(response)).into_response())
}
