//! # Database Operations
//!
//! The transactional store behind the dispatcher.
//!
//! ## Key Components
//!
//! - [`store`] - `Store` / `StoreTransaction` traits every component works through
//! - [`postgres`] - PostgreSQL implementation on sqlx
//! - [`memory`] - in-memory implementation for tests and embedded use
//! - [`connection`] - pool construction from configuration
//! - [`migrations`] - embedded schema migrations
//! - [`pagination`] - keyset pagination and list filters
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use actions_core::config::DatabaseConfig;
//! use actions_core::database::{DatabaseConnection, PgStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! let store = PgStore::new(connection.pool().clone());
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod pagination;
pub mod postgres;
pub mod store;

pub use connection::DatabaseConnection;
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use migrations::{run_migrations, MIGRATOR};
pub use pagination::{ExecutionFilter, JobFilter, ListOpts, Page};
pub use postgres::{PgStore, PgTransaction};
pub use store::{Store, StoreTransaction};
