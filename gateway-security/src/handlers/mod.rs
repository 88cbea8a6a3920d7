//! HTTP adapter. Every route runs its terminal handler through one of three
//! shared pipelines, with a [`RoutePolicy`] attached to the request.

pub mod admin;
pub mod auth;
pub mod health;
pub mod metrics;
pub mod rbac;

use axum::{
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    Json, RequestExt,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;
use validator::Validate;

use crate::middleware::{
    pipeline::BoxFuture, ActivityLogMiddleware, AuthMiddleware, PermissionMiddleware, Pipeline,
    RateLimitMiddleware, RoutePolicy, SudoMiddleware,
};
use crate::models::AuthenticatedUser;
use crate::services::{ActivityStore, AuthService, PermissionResolver, RateLimiter};
use crate::AppState;

/// Which pipeline a route runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// `[RateLimit]`, keyed per IP.
    Public,
    /// `[Auth, ActivityLog, RateLimit, Permission]`, keyed per principal.
    Authenticated,
    /// `[Auth, ActivityLog, RateLimit, Sudo, Permission]`.
    Sudo,
}

#[derive(Clone)]
pub struct Pipelines {
    pub public: Pipeline,
    pub authenticated: Pipeline,
    pub sudo: Pipeline,
}

impl Pipelines {
    pub fn new(
        auth: &AuthService,
        permissions: &PermissionResolver,
        limiter: &RateLimiter,
        activity: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            public: Pipeline::new().pipe(RateLimitMiddleware::new(limiter.clone())),
            authenticated: Pipeline::new()
                .pipe(AuthMiddleware::new(auth.clone()))
                .pipe(ActivityLogMiddleware::new(activity.clone(), false))
                .pipe(RateLimitMiddleware::new(limiter.clone()))
                .pipe(PermissionMiddleware::new(permissions.clone())),
            sudo: Pipeline::new()
                .pipe(AuthMiddleware::new(auth.clone()))
                .pipe(ActivityLogMiddleware::new(activity, true))
                .pipe(RateLimitMiddleware::new(limiter.clone()))
                .pipe(SudoMiddleware::new(permissions.clone()))
                .pipe(PermissionMiddleware::new(permissions.clone())),
        }
    }

    pub fn get(&self, guard: Guard) -> &Pipeline {
        match guard {
            Guard::Public => &self.public,
            Guard::Authenticated => &self.authenticated,
            Guard::Sudo => &self.sudo,
        }
    }
}

/// Wrap a terminal handler into an axum handler that runs `guard`'s pipeline
/// with `policy` attached.
pub fn endpoint<F, Fut>(
    guard: Guard,
    policy: RoutePolicy,
    handler: F,
) -> impl FnOnce(State<AppState>, Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    F: Fn(AppState, Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send + 'static,
{
    move |State(state): State<AppState>, mut req: Request| -> BoxFuture<'static, Response> {
        Box::pin(async move {
            req.extensions_mut().insert(policy);
            let pipeline = state.pipelines.get(guard).clone();
            let terminal = move |req: Request| {
                let fut = handler(state.clone(), req);
                async move { fut.await.unwrap_or_else(IntoResponse::into_response) }
            };
            pipeline.process(req, &terminal).await
        })
    }
}

/// Principal established by the auth middleware.
pub(crate) fn principal(req: &Request) -> Result<AuthenticatedUser, AppError> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Authentication required.".to_string()))
}

pub(crate) async fn path_param<T>(req: &mut Request) -> Result<T, AppError>
where
    T: DeserializeOwned + Send + 'static,
{
    let Path(value) = req
        .extract_parts::<Path<T>>()
        .await
        .map_err(|e| AppError::invalid_request(e.body_text()))?;
    Ok(value)
}

pub(crate) async fn json_body<T>(req: Request) -> Result<T, AppError>
where
    T: DeserializeOwned + 'static,
{
    let Json(body) = req
        .extract::<Json<T>, _>()
        .await
        .map_err(|e| AppError::invalid_request(e.body_text()))?;
    Ok(body)
}

pub(crate) async fn validated_body<T>(req: Request) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate + 'static,
{
    let body: T = json_body(req).await?;
    body.validate()?;
    Ok(body)
}
