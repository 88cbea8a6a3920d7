//! Security services: tokens, authentication, permissions, rate limiting and
//! lockout, self-service password resets, plus the persistence contract
//! they share.

pub mod auth;
mod database;
pub mod developer_guard;
pub mod error;
pub mod ip_blocker;
pub mod jwt;
pub mod memory;
pub mod metrics;
pub mod password_reset;
pub mod permission;
pub mod rate_limiter;
pub mod rbac_admin;
pub mod reset_delivery;
pub mod store;

pub use auth::{AuthService, ImpersonationGrant, LoginResult, TokenPair};
pub use database::Database;
pub use developer_guard::{DeveloperGuard, GuardReport, ROOT_PRINCIPAL};
pub use error::ServiceError;
pub use ip_blocker::IpBlocker;
pub use jwt::{Claims, IssuedToken, TokenService};
pub use memory::MemoryStore;
pub use password_reset::PasswordResetService;
pub use permission::{PermissionCache, PermissionResolver, PermissionSet, DEVELOPER_ROLE, WILDCARD};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use rbac_admin::RbacAdminService;
pub use reset_delivery::{CapturingDelivery, LogDelivery, ResetDelivery};
pub use store::{
    ActivityStore, LockoutStore, PasswordResetStore, RateLimitStore, RbacStore, SecurityStore,
    TokenLedger, UserStore,
};
