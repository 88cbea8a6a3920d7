//! PostgreSQL pool setup and embedded migrations.

use crate::config::DatabaseConfig;
use crate::services::Database;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Security schema is up to date");
    Ok(())
}

/// Pool plus migrations: a store ready for the gateway.
pub async fn connect(config: &DatabaseConfig) -> Result<Database, anyhow::Error> {
    let pool = create_pool(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    Ok(Database::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SecurityStore;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_connect_and_migrate() {
        let config = DatabaseConfig {
            url: std::env::var("GATEWAY_DATABASE__URL")
                .unwrap_or_else(|_| "postgres://localhost/gateway_test".to_string()),
            max_connections: 2,
            min_connections: 1,
        };

        let db = connect(&config).await.unwrap();
        assert!(db.health_check().await.is_ok());
    }
}
