use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::config::loader::mask_url_password;
use crate::error::Result;

/// Pooled PostgreSQL connection built from configuration
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Connect and, when configured, apply the embedded migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(
            database_url = %mask_url_password(&config.url),
            max_connections = config.max_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        if config.run_migrations {
            super::migrations::run_migrations(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
