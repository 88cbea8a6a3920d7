use async_trait::async_trait;
use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

use crate::middleware::pipeline::{Middleware, Next};
use crate::models::AuthenticatedUser;
use crate::services::PermissionResolver;

/// Admits only developer-role principals and marks them `is_sudo`.
/// Must run after [`super::AuthMiddleware`].
pub struct SudoMiddleware {
    permissions: PermissionResolver,
}

impl SudoMiddleware {
    pub fn new(permissions: PermissionResolver) -> Self {
        Self { permissions }
    }
}

#[async_trait]
impl Middleware for SudoMiddleware {
    async fn handle(&self, mut req: Request, next: Next<'_>) -> Response {
        let user_id = match req.extensions().get::<AuthenticatedUser>() {
            Some(principal) => principal.id(),
            None => {
                return AppError::Unauthorized("Authentication required.".to_string())
                    .into_response()
            }
        };

        match self.permissions.is_sudo(user_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(user_id, path = %req.uri().path(), "Sudo access denied");
                return AppError::Forbidden(
                    "This action requires developer (sudo) privileges.".to_string(),
                )
                .into_response();
            }
            Err(e) => return AppError::from(e).into_response(),
        }

        if let Some(principal) = req.extensions_mut().get_mut::<AuthenticatedUser>() {
            principal.is_sudo = true;
        }
        next.run(req).await
    }
}
