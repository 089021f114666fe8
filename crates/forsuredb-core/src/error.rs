//! Error types for schema replay, diffing and DDL generation.

/// Errors raised by the schema and DDL layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A table or column named by the caller is not part of the schema.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A migration lacks an attribute its type requires.
    #[error("Migration {migration_type} is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Migration type tag (e.g. `ALTER_TABLE_ADD_COLUMN`).
        migration_type: &'static str,
        /// Name of the missing attribute.
        attribute: &'static str,
    },

    /// An attribute value could not be parsed.
    #[error("Invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute {
        /// Attribute name.
        attribute: String,
        /// Offending value.
        value: String,
    },

    /// Replaying a migration would leave the schema inconsistent.
    #[error("Invalid schema state: {0}")]
    InvalidState(String),

    /// The replayed schema does not match the snapshot stored with a migration set.
    #[error("Replayed schema does not match the target snapshot of version {db_version}")]
    SchemaMismatch {
        /// Version whose snapshot disagrees.
        db_version: u32,
    },

    /// Migration sets are not strictly ascending by version.
    #[error("Migration set version {next} does not follow version {previous}")]
    VersionOrder {
        /// Version of the preceding set.
        previous: u32,
        /// Version of the offending set.
        next: u32,
    },

    /// IO error while reading a manifest.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_attribute(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub(crate) fn no_such_table(table: &str) -> Self {
        Self::InvalidState(format!("Table '{table}' does not exist"))
    }

    pub(crate) fn no_such_column(table: &str, column: &str) -> Self {
        Self::InvalidState(format!(
            "Column '{column}' does not exist in table '{table}'"
        ))
    }
}

/// Result type for the schema and DDL layer.
pub type Result<T> = std::result::Result<T, Error>;
