//! SQLite dialect helpers.
//!
//! Type-name mapping, literal quoting and the SQL expressions the DDL
//! generators share. DDL cannot bind parameters, so every value that ends up
//! in a statement goes through [`SqliteDialect::quote_literal`].

use crate::schema::{ColumnInfo, QualifiedType};

/// Expression evaluating to the current UTC time with millisecond precision.
pub const CURRENT_UTC_TIME: &str = "STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW')";

/// Prefix of the temporary table used while recreating a table.
pub const NEW_TABLE_PREFIX: &str = "forsuredb_new_";

/// SQLite dialect for DDL generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the SQL column type for a qualified type.
    #[must_use]
    pub const fn type_name(&self, qualified_type: QualifiedType) -> &'static str {
        match qualified_type {
            QualifiedType::Boolean
            | QualifiedType::Byte
            | QualifiedType::Short
            | QualifiedType::Int
            | QualifiedType::Long => "INTEGER",
            QualifiedType::Float | QualifiedType::Double => "REAL",
            QualifiedType::String | QualifiedType::BigInteger | QualifiedType::BigDecimal => {
                "TEXT"
            }
            QualifiedType::Blob => "BLOB",
            QualifiedType::Datetime => "DATETIME",
        }
    }

    /// Returns the current-UTC-time expression.
    #[must_use]
    pub const fn current_utc_time(&self) -> &'static str {
        CURRENT_UTC_TIME
    }

    /// Quotes a string literal, doubling embedded single quotes.
    #[must_use]
    pub fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Renders the default of `column` as the SQL inside `DEFAULT(...)`.
    ///
    /// Text-affine types are always quoted. Datetime defaults are quoted unless
    /// they are a time expression such as [`CURRENT_UTC_TIME`]. Boolean
    /// `true`/`false` become `1`/`0`; other numeric literals are inlined.
    #[must_use]
    pub fn render_default(&self, column: &ColumnInfo) -> Option<String> {
        let literal = column.default_value.as_deref()?;
        let rendered = match column.qualified_type {
            t if t.is_textual() => self.quote_literal(literal),
            QualifiedType::Datetime if is_time_expression(literal) => literal.to_string(),
            QualifiedType::Datetime => self.quote_literal(literal),
            QualifiedType::Boolean if literal.eq_ignore_ascii_case("true") => "1".to_string(),
            QualifiedType::Boolean if literal.eq_ignore_ascii_case("false") => "0".to_string(),
            QualifiedType::Blob => literal.to_string(),
            _ => literal.trim().to_string(),
        };
        Some(rendered)
    }

    /// `PRAGMA foreign_keys = true|false;`, as emitted around table creation.
    #[must_use]
    pub fn foreign_keys_switch(&self, enabled: bool) -> String {
        format!("PRAGMA foreign_keys = {enabled};")
    }

    /// `PRAGMA foreign_keys = ON|OFF;`, as emitted around table recreation.
    #[must_use]
    pub fn foreign_keys_pragma(&self, enabled: bool) -> String {
        format!("PRAGMA foreign_keys = {};", if enabled { "ON" } else { "OFF" })
    }

    /// Name of the trigger maintaining the `modified` column.
    #[must_use]
    pub fn modified_trigger_name(&self, table: &str) -> String {
        format!("{table}_modified_trigger")
    }

    /// The trigger keeping `modified` current on every update.
    #[must_use]
    pub fn modified_trigger(&self, table: &str) -> String {
        format!(
            "CREATE TRIGGER IF NOT EXISTS {} AFTER UPDATE ON {table} BEGIN UPDATE {table} SET modified={} WHERE _id=NEW._id; END;",
            self.modified_trigger_name(table),
            self.current_utc_time()
        )
    }
}

fn is_time_expression(literal: &str) -> bool {
    let upper = literal.trim().to_ascii_uppercase();
    ["STRFTIME(", "DATETIME(", "CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}
