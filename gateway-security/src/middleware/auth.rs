use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

use crate::middleware::pipeline::{Middleware, Next};
use crate::models::AuthenticatedUser;
use crate::services::AuthService;

/// Raw token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Establishes the principal. Everything after it can rely on an
/// [`AuthenticatedUser`] in the request extensions.
pub struct AuthMiddleware {
    auth: AuthService,
}

impl AuthMiddleware {
    pub fn new(auth: AuthService) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(&self, mut req: Request, next: Next<'_>) -> Response {
        let token = match bearer_token(req.headers()) {
            Some(token) => token.to_string(),
            None => {
                return AppError::Unauthorized(
                    "Authentication required. Provide Bearer token in Authorization header."
                        .to_string(),
                )
                .into_response();
            }
        };

        let principal = match self.auth.validate_access_token(&token).await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::debug!(error = %e, "Access token rejected");
                return AppError::from(e).into_response();
            }
        };

        tracing::Span::current().record("user_id", principal.id());
        req.extensions_mut().insert(principal);
        next.run(req).await
    }
}

/// Principal set by [`AuthMiddleware`], if it ran.
pub fn principal(req: &Request) -> Option<&AuthenticatedUser> {
    req.extensions().get::<AuthenticatedUser>()
}
