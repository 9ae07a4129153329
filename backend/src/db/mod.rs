//! # Database Module
//!
//! This module handles all database operations for the retail ledger backend.
//! PostgreSQL is the single source of truth for:
//!
//! - Account balances (wallet and points) and their audit trails
//! - Product stock counters
//! - Orders, order items and escrowed (pending) point rewards
//! - Card payment requests sent to the external gateway
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DATABASE LAYER                              │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   Connection Pool                         │   │
//! │  │                  (deadpool-postgres)                      │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                              │                                   │
//! │         ┌────────────────────┼────────────────────┐             │
//! │         ▼                    ▼                    ▼             │
//! │  ┌────────────┐      ┌────────────┐       ┌────────────┐       │
//! │  │  Balances  │      │   Orders   │       │  Pending   │       │
//! │  │  + Audit   │      │  + Items   │       │   Points   │       │
//! │  └────────────┘      └────────────┘       └────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Any value that is read to make a business decision (stock, balances,
//! order status) is read with `SELECT ... FOR UPDATE` inside the same
//! transaction that writes it. The `*_for_update` query helpers take a
//! `Transaction` for that reason.

pub mod models;
pub mod queries;

use deadpool_postgres::{Client, Config, Pool, Runtime};
use tokio_postgres::{Config as TokioConfig, NoTls};
use thiserror::Error;
use tracing::{error, info};

/// Schema applied at startup. Every statement is idempotent.
const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A stored value could not be mapped back to a domain type
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Database connection wrapper.
///
/// This struct wraps the connection pool and provides
/// methods for common database operations.
///
/// ## Usage
///
/// ```rust,ignore
/// let db = Database::connect("postgres://...", 10).await?;
/// let mut client = db.client().await?;
/// let tx = client.transaction().await?;
/// ```
#[derive(Clone)]
pub struct Database {
    /// The connection pool
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// ## Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    /// * `max_size` - Maximum number of pooled connections
    ///
    /// ## Returns
    ///
    /// * `Ok(Database)` - Connected successfully
    /// * `Err(DatabaseError)` - Connection failed
    pub async fn connect(database_url: &str, max_size: usize) -> Result<Self, DatabaseError> {
        info!("Connecting to database...");

        // Parse the connection string using tokio_postgres::Config
        let tokio_config = database_url.parse::<TokioConfig>()
            .map_err(|e| DatabaseError::ConfigError(format!("Invalid database URL: {}", e)))?;

        // Convert to deadpool config
        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(tokio_postgres::config::Host::Tcp(host)) = tokio_config.get_hosts().first() {
            config.host = Some(host.clone());
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Verify the pool can actually hand out a working connection
        let client = pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;
        client.query("SELECT 1", &[]).await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connection established (pool size {})", max_size);

        Ok(Self { pool })
    }

    /// Apply the embedded schema.
    ///
    /// The schema only uses `IF NOT EXISTS` statements, so running it on
    /// every boot is safe.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        let client = self.client().await?;

        match client.batch_execute(INITIAL_SCHEMA).await {
            Ok(_) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                let error_code = e.code().map(|c| c.code().to_string());
                let error_detail = e.as_db_error()
                    .and_then(|db_err| db_err.detail())
                    .unwrap_or("No detail available");
                let error_hint = e.as_db_error()
                    .and_then(|db_err| db_err.hint())
                    .unwrap_or("No hint available");

                error!("Migration execution error:");
                error!("  Error: {}", e);
                error!("  Code: {:?}", error_code);
                error!("  Detail: {}", error_detail);
                error!("  Hint: {}", error_hint);

                Err(DatabaseError::MigrationError(format!(
                    "{} (code: {:?}, detail: {}, hint: {})",
                    e, error_code, error_detail, error_hint
                )))
            }
        }
    }

    /// Check out a pooled client.
    ///
    /// Callers that need atomicity open a transaction on it:
    /// `client.transaction().await?`. Dropping an uncommitted transaction
    /// rolls it back.
    pub async fn client(&self) -> Result<Client, DatabaseError> {
        self.pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// Re-export commonly used items
pub use models::*;
