//! Migration history tracking.
//!
//! This module manages the `forsuredb_migrations` table that records which
//! database versions have been applied.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::Executor;

use crate::error::{MigrateError, Result};

/// Name of the history table.
pub const HISTORY_TABLE: &str = "forsuredb_migrations";

/// SQL to create the migrations history table.
pub const CREATE_MIGRATIONS_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS forsuredb_migrations (
    db_version INTEGER PRIMARY KEY,
    statement_count INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// A record of an applied database version.
#[derive(Debug, Clone)]
pub struct AppliedVersion {
    /// Database version.
    pub db_version: u32,
    /// Number of statements the version's script executed.
    pub statement_count: u64,
    /// When the version was applied.
    pub applied_at: DateTime<Utc>,
}

/// Manages the migration history in the database.
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    pool: SqlitePool,
}

impl MigrationHistory {
    /// Creates a new migration history manager.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensures the history table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(CREATE_MIGRATIONS_TABLE_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether the history table exists.
    pub async fn exists(&self) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(HISTORY_TABLE)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Records a version as applied.
    pub async fn record_applied(&self, db_version: u32, statement_count: usize) -> Result<()> {
        insert_applied(&self.pool, db_version, statement_count).await
    }

    /// Records a version as applied on `conn`, inside whatever transaction
    /// is open there.
    pub async fn record_applied_on(
        &self,
        conn: &mut SqliteConnection,
        db_version: u32,
        statement_count: usize,
    ) -> Result<()> {
        insert_applied(&mut *conn, db_version, statement_count).await
    }

    /// Highest applied version, or `None` for a database never migrated.
    pub async fn current_version(&self) -> Result<Option<u32>> {
        if !self.exists().await? {
            return Ok(None);
        }
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(db_version) FROM forsuredb_migrations")
            .fetch_one(&self.pool)
            .await?;
        row.0.map(to_version).transpose()
    }

    /// Gets all applied versions in ascending order.
    pub async fn get_applied(&self) -> Result<Vec<AppliedVersion>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT db_version, statement_count, applied_at FROM forsuredb_migrations ORDER BY db_version",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(db_version, statement_count, applied_at)| {
                Ok(AppliedVersion {
                    db_version: to_version(db_version)?,
                    statement_count: u64::try_from(statement_count).unwrap_or_default(),
                    applied_at: parse_timestamp(&applied_at)?,
                })
            })
            .collect()
    }
}

async fn insert_applied<'e, E>(executor: E, db_version: u32, statement_count: usize) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let statement_count = i64::try_from(statement_count)
        .map_err(|_| MigrateError::InvalidState("Statement count overflow".to_string()))?;
    sqlx::query("INSERT INTO forsuredb_migrations (db_version, statement_count) VALUES (?, ?)")
        .bind(i64::from(db_version))
        .bind(statement_count)
        .execute(executor)
        .await?;
    Ok(())
}

fn to_version(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| MigrateError::InvalidState(format!("Recorded version {value} is out of range")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime format fallback
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .map_err(|e| {
            MigrateError::InvalidState(format!("Unreadable applied_at timestamp '{value}': {e}"))
        })
}
