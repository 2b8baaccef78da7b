//! Database connection management for the signal store.
//!
//! Initializes a SeaORM connection to the embedded SQLite database. The
//! store is a single-writer file: the pool is capped at one connection so
//! write transactions serialize in the store rather than erroring with
//! `SQLITE_BUSY` under concurrent callers.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};

use crate::config::AppConfig;

/// Errors that can occur during database initialization.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Build the SQLite connection URL for a configured store path.
pub fn connection_url(store_path: &str) -> String {
    if store_path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{}?mode=rwc", store_path)
    }
}

/// Initializes the store database connection.
///
/// Creates the parent directory for file-backed stores, connects with a
/// single-connection pool, and enables foreign keys.
pub async fn init_store(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let path = cfg.store.path.as_str();
    if path.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "store path cannot be empty".to_string(),
        }
        .into());
    }

    if path != ":memory:" {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating store directory {}", parent.display()))?;
            }
        }
    }

    let mut opt = ConnectOptions::new(connection_url(path));
    opt.max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let conn = Database::connect(opt)
        .await
        .map_err(|source| DatabaseError::ConnectionFailed { source })?;

    conn.execute(Statement::from_string(
        conn.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await
    .map_err(|source| DatabaseError::ConnectionFailed { source })?;

    Ok(conn)
}

/// Health check for the store connection.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("store health check failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_url() {
        assert_eq!(connection_url(":memory:"), "sqlite::memory:");
    }

    #[test]
    fn file_url_creates_on_open() {
        assert_eq!(
            connection_url("data/signals.db"),
            "sqlite://data/signals.db?mode=rwc"
        );
    }

    #[tokio::test]
    async fn empty_path_is_invalid() {
        let mut config = AppConfig::default();
        config.store.path = String::new();
        let result = init_store(&config).await;
        assert!(result.is_err());
    }
}
