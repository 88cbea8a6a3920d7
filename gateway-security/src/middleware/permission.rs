use async_trait::async_trait;
use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

use crate::middleware::pipeline::{Middleware, Next, RoutePolicy};
use crate::models::AuthenticatedUser;
use crate::services::PermissionResolver;

/// Enforces the route's `required_permissions`, all of which must be held.
pub struct PermissionMiddleware {
    permissions: PermissionResolver,
}

impl PermissionMiddleware {
    pub fn new(permissions: PermissionResolver) -> Self {
        Self { permissions }
    }
}

#[async_trait]
impl Middleware for PermissionMiddleware {
    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let required = req
            .extensions()
            .get::<RoutePolicy>()
            .map(|policy| policy.required_permissions.clone())
            .unwrap_or_default();
        if required.is_empty() {
            return next.run(req).await;
        }

        let user_id = match req.extensions().get::<AuthenticatedUser>() {
            Some(principal) => principal.id(),
            None => {
                return AppError::Unauthorized("Authentication required.".to_string())
                    .into_response()
            }
        };

        match self
            .permissions
            .user_has_all_permissions(user_id, &required)
            .await
        {
            Ok(true) => next.run(req).await,
            Ok(false) => {
                tracing::warn!(
                    user_id,
                    required = ?required,
                    path = %req.uri().path(),
                    "Permission denied"
                );
                AppError::Forbidden(format!(
                    "Insufficient permissions. Required: {}",
                    required.join(", ")
                ))
                .into_response()
            }
            Err(e) => AppError::from(e).into_response(),
        }
    }
}
