//! Persistence layer for evo-signal
//!
//! SQLite storage for optimization runs: per-generation statistics, ranked
//! genomes and learning insights, so a run can be inspected after the fact.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the run store at `path`
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Connection(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        // The checkpoint writer and `history` may hold connections at once
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let db = Self::connect(options, 5).await?;
        debug!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::Connection(e.to_string()))?
            .foreign_keys(true);

        // Every in-memory connection is its own database
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.create_schema().await?;
        Ok(db)
    }

    /// Apply `schema::CREATE_TABLES` one statement at a time
    async fn create_schema(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            let sql: String = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let sql = sql.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Schema(format!("{e}: {sql}")))?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clone the pool for use in spawned tasks
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn columns(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_schema_has_verdict_columns() {
        let db = Database::in_memory().await.unwrap();

        assert!(columns(db.pool(), "optimization_runs").await.contains(&"best_verdict".to_string()));
        assert!(columns(db.pool(), "genome_results").await.contains(&"verdict".to_string()));

        // Re-applying the schema to an existing store is a no-op
        db.create_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let db = Database::in_memory().await.unwrap();

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(enabled, 1);

        let orphan = sqlx::query(
            "INSERT INTO learning_insights (run_id, generation, parameter_name, \
             directional_correlation, sample_size, fitness_delta, confidence) \
             VALUES ('missing', 1, 'rsi_period', 1.0, 10, 0.5, 0.5)",
        )
        .execute(db.pool())
        .await;
        assert!(orphan.is_err());
    }
}
