//! Migration executor.
//!
//! Plans SQL for a manifest and applies the versions a database has not
//! seen yet, recording each one in the history table.

use forsuredb_core::dialect::SqliteDialect;
use forsuredb_core::migration::MigrationSet;
use forsuredb_core::planner::{MigrationPlanner, VersionScript};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::history::MigrationHistory;

/// Executes version scripts against a database.
pub struct MigrationExecutor {
    pool: SqlitePool,
    history: MigrationHistory,
    dry_run: bool,
}

impl MigrationExecutor {
    /// Creates a new migration executor.
    pub fn new(pool: SqlitePool) -> Self {
        let history = MigrationHistory::new(pool.clone());
        Self {
            pool,
            history,
            dry_run: false,
        }
    }

    /// Enables dry-run mode (SQL is printed but not executed).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Ensures the migrations history table exists.
    pub async fn init(&self) -> Result<()> {
        if !self.dry_run {
            self.history.ensure_table().await?;
        }
        Ok(())
    }

    /// Returns the migration history.
    #[must_use]
    pub fn history(&self) -> &MigrationHistory {
        &self.history
    }

    /// Highest version applied to the database.
    pub async fn current_version(&self) -> Result<Option<u32>> {
        self.history.current_version().await
    }

    /// Executes one version script and records it, as a single transaction.
    ///
    /// Foreign-key enforcement is switched off on the connection before the
    /// transaction opens and back on after it ends, since SQLite ignores
    /// `PRAGMA foreign_keys` inside a transaction. The script's own pragmas
    /// and transaction statements are therefore skipped. The history row is
    /// written in the same transaction, so a failing statement leaves neither
    /// schema changes nor a record behind.
    pub async fn apply_script(&self, script: &VersionScript) -> Result<()> {
        info!(
            db_version = script.db_version,
            statements = script.statements.len(),
            "Applying version"
        );

        if self.dry_run {
            println!("-- version {}", script.db_version);
            for sql in &script.statements {
                println!("{sql}");
            }
            return Ok(());
        }

        self.history.ensure_table().await?;

        let dialect = SqliteDialect::new();
        let mut conn = self.pool.acquire().await?;
        sqlx::query(&dialect.foreign_keys_pragma(false))
            .execute(&mut *conn)
            .await?;

        let result = self.run_in_transaction(&mut *conn, script).await;
        if result.is_err() {
            warn!(db_version = script.db_version, "Rolling back failed version");
            if let Err(e) = sqlx::query("ROLLBACK;").execute(&mut *conn).await {
                warn!(error = %e, "Rollback failed");
            }
        }
        if let Err(e) = sqlx::query(&dialect.foreign_keys_pragma(true))
            .execute(&mut *conn)
            .await
        {
            warn!(error = %e, "Could not re-enable foreign keys");
        }
        result?;

        info!(db_version = script.db_version, "Version applied successfully");
        Ok(())
    }

    async fn run_in_transaction(
        &self,
        conn: &mut SqliteConnection,
        script: &VersionScript,
    ) -> Result<()> {
        sqlx::query("BEGIN TRANSACTION;").execute(&mut *conn).await?;
        for sql in &script.statements {
            if is_transaction_control(sql) || is_foreign_keys_pragma(sql) {
                debug!(sql = %sql, "Skipping statement handled by the executor");
                continue;
            }
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(sql)
                .execute(&mut *conn)
                .await
                .map_err(|source| MigrateError::Statement {
                    db_version: script.db_version,
                    sql: sql.clone(),
                    source,
                })?;
        }
        self.history
            .record_applied_on(&mut *conn, script.db_version, script.statements.len())
            .await?;
        sqlx::query("COMMIT;").execute(&mut *conn).await?;
        Ok(())
    }

    /// Plans every set and returns the scripts above the current version, up
    /// to and including `target` when given.
    pub async fn pending(
        &self,
        sets: &[MigrationSet],
        target: Option<u32>,
    ) -> Result<Vec<VersionScript>> {
        if let Some(target) = target {
            if !sets.iter().any(|s| s.db_version == target) {
                return Err(MigrateError::UnknownVersion(target));
            }
        }

        let current = self.current_version().await?;
        let scripts = MigrationPlanner::plan(sets)?;
        if let (Some(current), Some(latest)) = (current, scripts.last()) {
            if current > latest.db_version {
                warn!(
                    current,
                    latest = latest.db_version,
                    "Database is ahead of the manifest"
                );
            }
        }

        Ok(scripts
            .into_iter()
            .filter(|s| current.map_or(true, |c| s.db_version > c))
            .filter(|s| target.map_or(true, |t| s.db_version <= t))
            .collect())
    }

    /// Applies every pending version in ascending order and returns the
    /// versions applied. Running it again applies nothing.
    pub async fn migrate(&self, sets: &[MigrationSet], target: Option<u32>) -> Result<Vec<u32>> {
        self.init().await?;

        let pending = self.pending(sets, target).await?;
        if pending.is_empty() {
            info!("No pending versions");
            return Ok(Vec::new());
        }

        let mut applied = Vec::with_capacity(pending.len());
        for script in &pending {
            self.apply_script(script).await?;
            applied.push(script.db_version);
        }
        Ok(applied)
    }

    /// Plans SQL for every set without executing it, optionally for one version only.
    pub fn sql_for(sets: &[MigrationSet], version: Option<u32>) -> Result<Vec<VersionScript>> {
        let scripts = MigrationPlanner::plan(sets)?;
        match version {
            None => Ok(scripts),
            Some(version) => {
                let script = scripts
                    .into_iter()
                    .find(|s| s.db_version == version)
                    .ok_or(MigrateError::UnknownVersion(version))?;
                Ok(vec![script])
            }
        }
    }
}

/// First keyword of `sql`, upper-cased.
fn leading_keyword(sql: &str) -> String {
    sql.split(|c: char| c.is_whitespace() || c == ';')
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Whether `sql` opens or ends a transaction.
fn is_transaction_control(sql: &str) -> bool {
    matches!(
        leading_keyword(sql).as_str(),
        "BEGIN" | "END" | "COMMIT" | "ROLLBACK"
    )
}

/// Whether `sql` switches foreign-key enforcement.
fn is_foreign_keys_pragma(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper
        .strip_prefix("PRAGMA")
        .is_some_and(|rest| rest.trim_start().starts_with("FOREIGN_KEYS"))
}
