//! Database connection, pool management and table locking.
//!
//! This module initializes the SeaORM connection pool and provides the
//! exclusive table lock that serializes hook get-or-create and teardown
//! across every replica sharing the database.

use anyhow::{Context, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement,
};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

const CONNECT_ATTEMPTS: u32 = 5;

/// Initializes a database connection pool with the given configuration.
///
/// This function creates a connection pool using SeaORM with
/// configurable maximum connections and acquire timeout. It implements
/// retry logic with exponential backoff for transient errors.
///
/// # Arguments
///
/// * `cfg` - Application configuration containing database settings
///
/// # Returns
///
/// Returns a `DatabaseConnection` pool on success, or an error on failure.
///
/// # Examples
///
/// ```no_run
/// use vcs_hooks::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     // Use the database connection...
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    // Validate database URL
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    // Configure connection options
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600)) // 10 minutes
        .max_lifetime(Duration::from_secs(1800)) // 30 minutes
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("connected to database (attempt {attempt})");
                return Ok(conn);
            }
            Err(e) if attempt >= CONNECT_ATTEMPTS => {
                log::error!("database unreachable after {attempt} attempts: {e}");
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
            Err(e) => {
                log::warn!("database connection attempt {attempt} failed: {e}, retrying in {retry_delay:?}");
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Health check for the database connection.
///
/// This function verifies that the database connection is still active
/// by executing a simple query.
///
/// # Arguments
///
/// * `db` - Database connection to check
///
/// # Returns
///
/// Returns `Ok(())` if the connection is healthy, or an error otherwise.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

/// Tables guarded by [`lock_tables`] during connect and disconnect.
pub const HOOK_TABLES: [&str; 2] = ["hooks", "repo_connections"];

/// Takes an exclusive, transaction-scoped lock on `tables`.
///
/// Must run inside a transaction; the lock is released on commit, rollback
/// or disconnect. Concurrent readers are not blocked.
///
/// * Postgres: `LOCK TABLE .. IN EXCLUSIVE MODE`.
/// * SQLite: has no table locks, so a write that matches no rows promotes the
///   transaction to the database-wide write lock.
pub async fn lock_tables<C>(conn: &C, tables: &[&'static str]) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let Some(first) = tables.first() else {
        return Ok(());
    };

    let backend = conn.get_database_backend();
    let sql = match backend {
        DbBackend::Postgres => format!("LOCK TABLE {} IN EXCLUSIVE MODE", tables.join(", ")),
        DbBackend::Sqlite => format!("UPDATE {first} SET id = id WHERE 1 = 0"),
        DbBackend::MySql => {
            return Err(DbErr::Custom(
                "table locking is not supported on MySQL".to_string(),
            ));
        }
    };

    log::debug!("acquiring exclusive lock on {}", tables.join(", "));
    conn.execute(Statement::from_string(backend, sql)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_database_url() {
        let mut config = AppConfig::default();
        config.database_url = "".to_string();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(init_pool(&config));
        
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            // read-only open of a file that does not exist
            database_url: format!(
                "sqlite://{}?mode=ro",
                dir.path().join("missing.db").display()
            ),
            ..Default::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_tables_inside_sqlite_transaction() {
        use migration::{Migrator, MigratorTrait};
        use sea_orm::TransactionTrait;

        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let txn = db.begin().await.unwrap();
        lock_tables(&txn, &HOOK_TABLES).await.unwrap();
        txn.commit().await.unwrap();

        health_check(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_tables_with_no_tables_is_noop() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        lock_tables(&db, &[]).await.unwrap();
    }
}