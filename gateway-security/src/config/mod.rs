use config::{builder::DefaultState, ConfigBuilder};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::fmt;

/// Shortest HMAC secret accepted for token signing, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// One day.
pub const MAX_ACCESS_TTL: i64 = 86_400;
/// One year.
pub const MAX_REFRESH_TTL: i64 = 31_536_000;
pub const MAX_RATE_LIMIT_WINDOW: i64 = 86_400;
/// One week.
pub const MAX_LOCKOUT_MINUTES: i64 = 10_080;
pub const MAX_RESET_TTL: i64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub port: u16,
    pub service_name: String,
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub lockout: LockoutConfig,
    pub rate_limit: RateLimitConfig,
    pub password_reset: PasswordResetConfig,
    #[serde(default)]
    pub permissions: PermissionCacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Access token lifetime in seconds.
    pub access_ttl: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Logarithmic work factor, bcrypt style.
    pub cost: u32,
    pub min_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed window length in seconds, shared by every group.
    pub window: i64,
    pub default_group: String,
    pub groups: HashMap<String, u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetConfig {
    /// Lifetime of a self-service reset token in seconds.
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionCacheConfig {
    /// Unset keeps resolved sets until explicitly invalidated.
    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub interval_seconds: u64,
}

impl GatewayConfig {
    /// Load from defaults, an optional `gateway` config file and `GATEWAY_*`
    /// environment variables (`GATEWAY_JWT__SECRET`, `GATEWAY_RATE_LIMIT__GROUPS__AI`).
    pub fn load() -> Result<Self, AppError> {
        Self::from_builder(core_config::layered(
            "gateway",
            "GATEWAY",
            &["security.allowed_origins"],
        ))
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, AppError> {
        let config: Self = core_config::load(with_defaults(builder)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt.secret.is_empty() {
            return Err(config_error("jwt.secret is not configured"));
        }
        if self.jwt.secret.len() < MIN_SECRET_LEN {
            return Err(config_error(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        ensure_range("jwt.access_ttl", self.jwt.access_ttl, MAX_ACCESS_TTL)?;
        ensure_range("jwt.refresh_ttl", self.jwt.refresh_ttl, MAX_REFRESH_TTL)?;
        ensure_range("rate_limit.window", self.rate_limit.window, MAX_RATE_LIMIT_WINDOW)?;
        ensure_range("lockout.minutes", self.lockout.minutes, MAX_LOCKOUT_MINUTES)?;
        ensure_range(
            "password_reset.ttl_seconds",
            self.password_reset.ttl_seconds,
            MAX_RESET_TTL,
        )?;
        if !(4..=20).contains(&self.password.cost) {
            return Err(config_error("password.cost must be between 4 and 20"));
        }
        if self.lockout.max_attempts == 0 {
            return Err(config_error("lockout.max_attempts must be positive"));
        }
        Ok(())
    }
}

fn ensure_range(name: &str, value: i64, max: i64) -> Result<(), AppError> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(config_error(format!("{} must be between 1 and {}", name, max)))
    }
}

fn config_error(message: impl fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{}", message))
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, AppError> {
    Ok(builder
        .set_default("port", 8080)?
        .set_default("service_name", "gateway-security")?
        .set_default("log_level", "info")?
        .set_default("database.url", "postgres://localhost:5432/gateway")?
        .set_default("database.max_connections", 10)?
        .set_default("database.min_connections", 1)?
        .set_default("jwt.access_ttl", 900)?
        .set_default("jwt.refresh_ttl", 2_592_000)?
        .set_default("password.cost", 12)?
        .set_default("password.min_length", 8)?
        .set_default("lockout.max_attempts", 5)?
        .set_default("lockout.minutes", 15)?
        .set_default("rate_limit.window", 3600)?
        .set_default("rate_limit.default_group", "authenticated")?
        .set_default("rate_limit.groups.public", 100)?
        .set_default("rate_limit.groups.authenticated", 1000)?
        .set_default("rate_limit.groups.ai", 100)?
        .set_default("rate_limit.groups.admin", 500)?
        .set_default("password_reset.ttl_seconds", 3600)?
        .set_default("maintenance.interval_seconds", 300)?)
}
