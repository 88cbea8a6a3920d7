pub mod activity;
pub mod api_token;
pub mod ip_block;
pub mod password_reset;
pub mod rate_limit;
pub mod role;
pub mod user;

pub use activity::{ActionType, ActivityEntry, NewActivityEntry};
pub use api_token::{ApiToken, NewApiToken, TokenType, MAX_USER_AGENT_LEN};
pub use ip_block::LockoutRecord;
pub use password_reset::{NewPasswordReset, PasswordReset};
pub use rate_limit::RateLimitCounter;
pub use role::{NewPermission, NewRole, Permission, PermissionMatrix, Role, RolePermissionGrant};
pub use user::{AuthenticatedUser, NewUser, SanitizedUser, User};
