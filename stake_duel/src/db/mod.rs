//! PostgreSQL connection pooling for the persistent ledger.
//!
//! The matchmaking and session layers never touch the database directly;
//! only `ledger::PgLedger` runs queries through the pool managed here.

use sqlx::postgres::PgPool;

pub mod config;
pub mod timeouts;

pub use config::DatabaseConfig;

/// Ledger schema, applied by `Database::migrate`
const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use stake_duel::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let config = DatabaseConfig::development();
    ///     let db = Database::new(&config).await?;
    ///     db.migrate().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = config.pool_options().connect(&config.database_url).await?;
        log::info!(
            "Connected ledger database pool (max {} connections)",
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(LEDGER_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        timeouts::bounded(timeouts::Budget::Query, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|e| match e {
                timeouts::TimeoutError::Database(e) => e,
                timeouts::TimeoutError::Timeout(_) => sqlx::Error::PoolTimedOut,
            })?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_ledger_tables() {
        for table in ["ledger_accounts", "ledger_batches", "ledger_entries"] {
            assert!(LEDGER_SCHEMA.contains(table), "schema is missing {table}");
        }
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL instance (DATABASE_URL)"]
    async fn test_database_connection() {
        let config = DatabaseConfig::from_env().unwrap_or_default();

        let db = Database::new(&config)
            .await
            .expect("Failed to connect to database");
        db.migrate().await.expect("Migration failed");
        db.health_check().await.expect("Health check failed");
        db.close().await;
    }
}
