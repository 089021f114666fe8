//! Error types for migration execution.

/// Errors that can occur while applying migrations to a database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The manifest could not be replayed or planned.
    #[error(transparent)]
    Schema(#[from] forsuredb_core::Error),

    /// Database error outside of a migration script.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A statement of a migration script failed.
    #[error("Failed to apply version {db_version}: {source}\n  statement: {sql}")]
    Statement {
        /// Version whose script failed.
        db_version: u32,
        /// The failing statement.
        sql: String,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The requested version is not in the manifest.
    #[error("Version {0} is not defined by the manifest")]
    UnknownVersion(u32),

    /// Invalid migration state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),
}

/// Result type for migration execution.
pub type Result<T> = std::result::Result<T, MigrateError>;
