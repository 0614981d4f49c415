use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::store::SqliteStore;

/// Owns the SQLite pool behind the task store
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if needed) the database and run migrations when enabled
    pub async fn new(settings: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&settings.url)
            .with_context(|| format!("Invalid database url {}", settings.url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("Creating database directory {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }

        // Template lookups run on a second connection while a unit of work holds one.
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(2))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", settings.url))?;

        let manager = Self { pool };
        if settings.auto_migrate {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.pool.clone())
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_nested_database_and_migrates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("signoff.db");
        let settings = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            max_connections: 2,
            auto_migrate: true,
        };

        let manager = DatabaseManager::new(&settings).await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('requests', 'tasks', 'step_templates', 'audit_events')",
        )
        .fetch_one(manager.pool())
        .await
        .unwrap();

        assert_eq!(tables, 4);
        assert!(path.exists());
        manager.shutdown().await;
    }
}
