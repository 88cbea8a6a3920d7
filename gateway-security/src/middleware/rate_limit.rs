use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use service_core::error::AppError;

use crate::middleware::pipeline::{Middleware, Next, RoutePolicy};
use crate::models::AuthenticatedUser;
use crate::services::{RateLimiter, ServiceError};
use crate::utils::client_ip;

pub const PUBLIC_GROUP: &str = "public";
pub const AUTHENTICATED_GROUP: &str = "authenticated";

/// Counts the request against a fixed window. Keyed per principal when auth
/// has already run, otherwise per client IP.
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
}

impl RateLimitMiddleware {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

/// Rate-limit key and group for a request in its current pipeline position.
pub fn rate_limit_key(req: &Request) -> (String, String) {
    let principal = req.extensions().get::<AuthenticatedUser>();
    let group = req
        .extensions()
        .get::<RoutePolicy>()
        .and_then(|policy| policy.rate_group.clone())
        .unwrap_or_else(|| {
            if principal.is_some() {
                AUTHENTICATED_GROUP.to_string()
            } else {
                PUBLIC_GROUP.to_string()
            }
        });

    let key = match principal {
        Some(principal) => format!("user:{}:{}", principal.id(), group),
        None => format!("ip:{}:{}", client_ip(req), group),
    };
    (key, group)
}

fn set_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: i64) {
    for (name, value) in [
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", remaining.to_string()),
        ("x-ratelimit-reset", reset.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let (key, group) = rate_limit_key(&req);

        match self.limiter.hit(&key, &group).await {
            Ok(decision) => {
                let mut res = next.run(req).await;
                set_headers(
                    res.headers_mut(),
                    decision.limit,
                    decision.remaining,
                    decision.reset,
                );
                res
            }
            Err(ServiceError::RateLimited { message, reset }) => {
                let mut res = AppError::TooManyRequests {
                    message,
                    reset: Some(reset),
                }
                .into_response();
                set_headers(res.headers_mut(), self.limiter.limit_for(&group), 0, reset);
                res
            }
            Err(e) => AppError::from(e).into_response(),
        }
    }
}
