pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{delete, get, post, put},
    Router,
};
use service_core::middleware::{
    make_request_span, request_id_middleware, security_headers_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::handlers::{endpoint, Guard, Pipelines};
use crate::middleware::RoutePolicy;
use crate::services::{
    AuthService, DeveloperGuard, IpBlocker, LogDelivery, PasswordResetService, PermissionCache,
    PermissionResolver, RateLimiter, RbacAdminService, ResetDelivery, SecurityStore, ServiceError,
    TokenService,
};
use crate::utils::PasswordHasher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<dyn SecurityStore>,
    pub auth: AuthService,
    pub permissions: PermissionResolver,
    pub developer_guard: DeveloperGuard,
    pub rbac: RbacAdminService,
    pub rate_limiter: RateLimiter,
    pub ip_blocker: IpBlocker,
    pub password_resets: PasswordResetService,
    pub pipelines: Pipelines,
}

impl AppState {
    /// Wire every service over one backing store.
    pub fn from_store<S>(config: GatewayConfig, store: Arc<S>) -> Result<Self, ServiceError>
    where
        S: SecurityStore + 'static,
    {
        let tokens = TokenService::new(&config.jwt)?;
        let hasher = PasswordHasher::new(config.password.cost)?;

        let cache = Arc::new(PermissionCache::new(
            config.permissions.cache_ttl_seconds.map(Duration::from_secs),
        ));
        let permissions = PermissionResolver::new(store.clone(), cache);
        let developer_guard =
            DeveloperGuard::new(store.clone(), store.clone(), permissions.clone());
        let ip_blocker = IpBlocker::new(store.clone(), &config.lockout);
        let rate_limiter = RateLimiter::new(store.clone(), config.rate_limit.clone());
        let auth = AuthService::new(
            tokens,
            store.clone(),
            store.clone(),
            hasher,
            ip_blocker.clone(),
            config.password.min_length,
        );
        let rbac = RbacAdminService::new(
            store.clone(),
            store.clone(),
            permissions.clone(),
            developer_guard.clone(),
        );
        let password_resets = PasswordResetService::new(
            store.clone(),
            store.clone(),
            auth.clone(),
            Arc::new(LogDelivery),
            config.password_reset.ttl_seconds,
        );
        let pipelines = Pipelines::new(&auth, &permissions, &rate_limiter, store.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
            permissions,
            developer_guard,
            rbac,
            rate_limiter,
            ip_blocker,
            password_resets,
            pipelines,
        })
    }

    /// Replace how self-service reset tokens reach their owners.
    pub fn with_reset_delivery(mut self, delivery: Arc<dyn ResetDelivery>) -> Self {
        self.password_resets = self.password_resets.with_delivery(delivery);
        self
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}

pub fn build_router(state: AppState) -> Router {
    use handlers::{admin, auth, rbac};

    let open = RoutePolicy::new;
    let sudo = || RoutePolicy::new().rate_group("admin");

    let public_routes = Router::new()
        .route("/api/auth/login", post(endpoint(Guard::Public, open(), auth::login)))
        .route("/api/auth/refresh", post(endpoint(Guard::Public, open(), auth::refresh)))
        .route("/api/auth/logout", post(endpoint(Guard::Public, open(), auth::logout)))
        .route(
            "/api/auth/forgot-password",
            post(endpoint(Guard::Public, open(), auth::forgot_password)),
        )
        .route(
            "/api/auth/reset-password",
            post(endpoint(Guard::Public, open(), auth::reset_password_with_token)),
        );

    let authenticated_routes = Router::new()
        .route("/api/auth/me", get(endpoint(Guard::Authenticated, open(), auth::me)))
        .route(
            "/api/permissions/check",
            get(endpoint(Guard::Authenticated, open(), auth::check_permissions)),
        )
        .route(
            "/api/permissions/matrix",
            get(endpoint(
                Guard::Authenticated,
                open().require("permissions.list"),
                rbac::permission_matrix,
            )),
        )
        .route(
            "/api/roles",
            post(endpoint(
                Guard::Authenticated,
                open().require("roles.create"),
                rbac::create_role,
            )),
        )
        .route(
            "/api/roles/:id",
            delete(endpoint(
                Guard::Authenticated,
                open().require("roles.delete"),
                rbac::delete_role,
            )),
        )
        .route(
            "/api/roles/:id/permissions",
            post(endpoint(
                Guard::Authenticated,
                open().require("roles.update"),
                rbac::grant_permission,
            )),
        )
        .route(
            "/api/roles/:id/permissions/:permission_id",
            delete(endpoint(
                Guard::Authenticated,
                open().require("roles.update"),
                rbac::revoke_permission,
            )),
        )
        .route(
            "/api/users",
            post(endpoint(
                Guard::Authenticated,
                open().require("users.create"),
                rbac::create_user,
            )),
        )
        .route(
            "/api/users/:id/roles",
            post(endpoint(
                Guard::Authenticated,
                open().require("users.update"),
                rbac::assign_role,
            )),
        )
        .route(
            "/api/users/:id/roles/:role_id",
            delete(endpoint(
                Guard::Authenticated,
                open().require("users.update"),
                rbac::remove_role,
            )),
        );

    let sudo_routes = Router::new()
        .route(
            "/api/admin/impersonate",
            post(endpoint(Guard::Sudo, sudo(), admin::impersonate)),
        )
        .route(
            "/api/admin/permissions",
            post(endpoint(Guard::Sudo, sudo(), admin::register_permission)),
        )
        .route(
            "/api/admin/permissions/:id",
            delete(endpoint(Guard::Sudo, sudo(), admin::delete_permission)),
        )
        .route(
            "/api/admin/developer/sync",
            post(endpoint(Guard::Sudo, sudo(), admin::sync_developer)),
        )
        .route(
            "/api/admin/ip-blocks/:ip",
            put(endpoint(Guard::Sudo, sudo(), admin::set_ip_whitelist)),
        )
        .route(
            "/api/admin/users/:id/password",
            post(endpoint(Guard::Sudo, sudo(), admin::reset_password)),
        )
        .route(
            "/api/admin/activity-log",
            get(endpoint(Guard::Sudo, sudo(), admin::activity_log)),
        );

    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(sudo_routes)
        .layer(cors)
        .layer(from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| make_request_span(req)))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
