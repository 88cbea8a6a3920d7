pub mod activity_log;
pub mod auth;
pub mod permission;
pub mod pipeline;
pub mod rate_limit;
pub mod sudo;

pub use activity_log::ActivityLogMiddleware;
pub use auth::{bearer_token, principal, AuthMiddleware};
pub use permission::PermissionMiddleware;
pub use pipeline::{Endpoint, Middleware, Next, Pipeline, RoutePolicy};
pub use rate_limit::{rate_limit_key, RateLimitMiddleware};
pub use sudo::SudoMiddleware;
