//! # Database Migrations
//!
//! Schema migrations live in `migrations/` (`YYYYMMDDHHMMSS_description.sql`)
//! and are embedded at compile time.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.iter().count(), "Database schema up to date");
    Ok(())
}
