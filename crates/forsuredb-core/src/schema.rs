//! Schema representation types.
//!
//! These types describe the logical structure of every table the database is
//! expected to contain. They are produced either by replaying migration sets
//! (see [`crate::state`]) or directly through the builders, and consumed by
//! the differ and the DDL generators.
//!
//! Every table carries four system columns: `_id`, `created`, `deleted` and
//! `modified`. Columns are keyed by name in a sorted map so that DDL
//! rendering has a stable column order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dialect::SqliteDialect;
use crate::error::{Error, Result};

/// Name of the implicit row id column.
pub const ID_COLUMN: &str = "_id";
/// Name of the creation timestamp column.
pub const CREATED_COLUMN: &str = "created";
/// Name of the last-modification timestamp column.
pub const MODIFIED_COLUMN: &str = "modified";
/// Name of the soft-delete flag column.
pub const DELETED_COLUMN: &str = "deleted";

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualifiedType {
    /// Boolean stored as 0/1.
    Boolean,
    /// 8-bit integer.
    Byte,
    /// 16-bit integer.
    Short,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Arbitrary precision integer, stored as text.
    BigInteger,
    /// Arbitrary precision decimal, stored as text.
    BigDecimal,
    /// Text.
    String,
    /// Raw bytes.
    Blob,
    /// Date and time.
    Datetime,
}

impl QualifiedType {
    /// All qualified types, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Boolean,
        Self::Byte,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::BigInteger,
        Self::BigDecimal,
        Self::String,
        Self::Blob,
        Self::Datetime,
    ];

    /// Returns the manifest name of this type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::BigInteger => "big_integer",
            Self::BigDecimal => "big_decimal",
            Self::String => "string",
            Self::Blob => "blob",
            Self::Datetime => "datetime",
        }
    }

    /// Whether default literals for this type are rendered as quoted text.
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::String | Self::BigInteger | Self::BigDecimal)
    }
}

impl fmt::Display for QualifiedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QualifiedType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid_attribute("column_type", s))
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum ForeignKeyAction {
    /// No action; SQLite's default.
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

impl FromStr for ForeignKeyAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', " ").to_ascii_uppercase();
        match normalized.as_str() {
            "" | "NO ACTION" => Ok(Self::NoAction),
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "SET DEFAULT" => Ok(Self::SetDefault),
            _ => Err(Error::invalid_attribute("foreign_key_action", s)),
        }
    }
}

/// ON CONFLICT resolution for a primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// `ON CONFLICT ROLLBACK`
    Rollback,
    /// `ON CONFLICT ABORT`
    Abort,
    /// `ON CONFLICT FAIL`
    Fail,
    /// `ON CONFLICT IGNORE`
    Ignore,
    /// `ON CONFLICT REPLACE`
    Replace,
}

impl ConflictResolution {
    /// Returns the SQL keyword for this resolution.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
            Self::Fail => "FAIL",
            Self::Ignore => "IGNORE",
            Self::Replace => "REPLACE",
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ROLLBACK" => Ok(Self::Rollback),
            "ABORT" => Ok(Self::Abort),
            "FAIL" => Ok(Self::Fail),
            "IGNORE" => Ok(Self::Ignore),
            "REPLACE" => Ok(Self::Replace),
            _ => Err(Error::invalid_attribute("primary_key_on_conflict", s)),
        }
    }
}

/// Sort order of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending (SQLite default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(Error::invalid_attribute("sort_order", s)),
        }
    }
}

/// Schema definition for a column.
///
/// A column is identified by its table and its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Owning table.
    pub table_name: String,
    /// Column name.
    pub name: String,
    /// Declared type.
    pub qualified_type: QualifiedType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Raw default literal.
    pub default_value: Option<String>,
    /// Whether the column has a UNIQUE constraint.
    pub unique: bool,
    /// Whether the column is part of a declared index.
    pub index: bool,
    /// Whether the column participates in a foreign key.
    pub foreign_key: bool,
}

impl ColumnInfo {
    /// Creates a nullable column without default.
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        name: impl Into<String>,
        qualified_type: QualifiedType,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            name: name.into(),
            qualified_type,
            nullable: true,
            default_value: None,
            unique: false,
            index: false,
            foreign_key: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the raw default literal.
    #[must_use]
    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    /// Sets the column as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the column as indexed.
    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// Marks the column as participating in a foreign key.
    #[must_use]
    pub fn foreign_key(mut self) -> Self {
        self.foreign_key = true;
        self
    }

    /// Returns `table.column`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    /// Whether this is one of the columns every table carries.
    #[must_use]
    pub fn is_system_column(&self) -> bool {
        is_system_column(&self.name)
    }
}

/// Returns whether `name` is one of the system columns.
#[must_use]
pub fn is_system_column(name: &str) -> bool {
    matches!(
        name,
        ID_COLUMN | CREATED_COLUMN | MODIFIED_COLUMN | DELETED_COLUMN
    )
}

/// The system columns for `table_name`.
#[must_use]
pub fn system_columns(table_name: &str) -> Vec<ColumnInfo> {
    let now = SqliteDialect::new().current_utc_time();
    vec![
        ColumnInfo::new(table_name, ID_COLUMN, QualifiedType::Long),
        ColumnInfo::new(table_name, CREATED_COLUMN, QualifiedType::Datetime).default_value(now),
        ColumnInfo::new(table_name, DELETED_COLUMN, QualifiedType::Boolean).default_value("0"),
        ColumnInfo::new(table_name, MODIFIED_COLUMN, QualifiedType::Datetime).default_value(now),
    ]
}

/// A local/foreign column pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPair {
    /// Column of the referencing table.
    pub local: String,
    /// Column of the referenced table.
    pub foreign: String,
}

/// Schema definition for a (possibly composite) foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Referencing table.
    pub table_name: String,
    /// Referenced table.
    pub foreign_table_name: String,
    /// Ordered column pairs.
    pub column_pairs: Vec<ColumnPair>,
    /// Action on update.
    pub update_action: ForeignKeyAction,
    /// Action on delete.
    pub delete_action: ForeignKeyAction,
}

impl ForeignKeyInfo {
    /// Creates a foreign key without column pairs.
    #[must_use]
    pub fn new(table_name: impl Into<String>, foreign_table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            foreign_table_name: foreign_table_name.into(),
            column_pairs: Vec::new(),
            update_action: ForeignKeyAction::NoAction,
            delete_action: ForeignKeyAction::NoAction,
        }
    }

    /// Adds a column pair, replacing an existing pair with the same local column.
    #[must_use]
    pub fn column_pair(mut self, local: impl Into<String>, foreign: impl Into<String>) -> Self {
        self.merge_pair(ColumnPair {
            local: local.into(),
            foreign: foreign.into(),
        });
        self
    }

    /// Sets the update action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.update_action = action;
        self
    }

    /// Sets the delete action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.delete_action = action;
        self
    }

    pub(crate) fn merge_pair(&mut self, pair: ColumnPair) {
        match self.column_pairs.iter_mut().find(|p| p.local == pair.local) {
            Some(existing) => existing.foreign = pair.foreign,
            None => self.column_pairs.push(pair),
        }
    }

    /// Identity under which column pairs collapse into one constraint.
    #[must_use]
    pub fn composite_id(&self) -> String {
        composite_id(
            &self.table_name,
            &self.foreign_table_name,
            self.update_action,
            self.delete_action,
        )
    }

    /// Local column names, in pair order.
    pub fn local_columns(&self) -> impl Iterator<Item = &str> {
        self.column_pairs.iter().map(|p| p.local.as_str())
    }

    /// Foreign column names, in pair order.
    pub fn foreign_columns(&self) -> impl Iterator<Item = &str> {
        self.column_pairs.iter().map(|p| p.foreign.as_str())
    }

    /// Parses the `target:local[,local]=foreign[,foreign]:update:delete` encoding.
    pub fn parse(table_name: &str, encoded: &str) -> Result<Self> {
        let invalid = || Error::invalid_attribute("foreign_key", encoded);
        let parts: Vec<&str> = encoded.split(':').collect();
        let [target, columns, update, delete] = parts.as_slice() else {
            return Err(invalid());
        };
        let (locals, foreigns) = columns.split_once('=').ok_or_else(invalid)?;
        let locals: Vec<&str> = locals.split(',').map(str::trim).collect();
        let foreigns: Vec<&str> = foreigns.split(',').map(str::trim).collect();
        if target.trim().is_empty()
            || locals.len() != foreigns.len()
            || locals.iter().chain(&foreigns).any(|c| c.is_empty())
        {
            return Err(invalid());
        }

        let mut fk = Self::new(table_name, target.trim())
            .on_update(update.parse()?)
            .on_delete(delete.parse()?);
        for (local, foreign) in locals.into_iter().zip(foreigns) {
            fk = fk.column_pair(local, foreign);
        }
        Ok(fk)
    }
}

impl fmt::Display for ForeignKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}:{}:{}",
            self.foreign_table_name,
            self.local_columns().collect::<Vec<_>>().join(","),
            self.foreign_columns().collect::<Vec<_>>().join(","),
            self.update_action,
            self.delete_action
        )
    }
}

/// Builds the composite id of a foreign key.
#[must_use]
pub fn composite_id(
    table_name: &str,
    foreign_table_name: &str,
    update_action: ForeignKeyAction,
    delete_action: ForeignKeyAction,
) -> String {
    format!("{table_name}:{foreign_table_name}:{update_action}:{delete_action}")
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Indexed table.
    pub table_name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Sort order applied to every column.
    pub order: SortOrder,
}

impl IndexInfo {
    /// Creates a non-unique ascending index.
    #[must_use]
    pub fn new(table_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            unique: false,
            order: SortOrder::Asc,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Index name, e.g. `users_unique_email` or `users_index_first_last`.
    #[must_use]
    pub fn name(&self) -> String {
        let kind = if self.unique { "unique" } else { "index" };
        format!("{}_{}_{}", self.table_name, kind, self.columns.join("_"))
    }
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Primary key column names.
    pub primary_key: BTreeSet<String>,
    /// ON CONFLICT resolution of the primary key.
    pub primary_key_on_conflict: Option<ConflictResolution>,
    /// Columns keyed by name.
    pub columns: BTreeMap<String, ColumnInfo>,
    /// Foreign keys keyed by composite id.
    pub foreign_keys: BTreeMap<String, ForeignKeyInfo>,
    /// Declared indices.
    pub indices: Vec<IndexInfo>,
    /// Asset holding static rows for this table.
    pub static_data_asset: Option<String>,
    /// Record element name inside the static data asset.
    pub static_data_record_name: Option<String>,
}

impl TableInfo {
    /// Creates a table containing only the system columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let columns = system_columns(&name)
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self {
            primary_key: BTreeSet::from([ID_COLUMN.to_string()]),
            primary_key_on_conflict: None,
            columns,
            foreign_keys: BTreeMap::new(),
            indices: Vec::new(),
            static_data_asset: None,
            static_data_record_name: None,
            name,
        }
    }

    /// Starts a builder for a table with only the system columns.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TableInfoBuilder {
        TableInfoBuilder {
            table: Self::new(name),
        }
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.get(name)
    }

    /// Whether the table has a column named `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in rendering order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Whether the primary key is the implicit `_id` column.
    #[must_use]
    pub fn has_default_primary_key(&self) -> bool {
        self.primary_key.len() == 1
            && self.primary_key.contains(ID_COLUMN)
            && self.primary_key_on_conflict.is_none()
    }

    /// Names of the tables this table references, excluding itself.
    pub fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .values()
            .map(|fk| fk.foreign_table_name.as_str())
            .filter(move |target| *target != self.name)
    }

    /// Inserts or merges a foreign key by composite id.
    pub(crate) fn upsert_foreign_key(&mut self, fk: ForeignKeyInfo) {
        match self.foreign_keys.get_mut(&fk.composite_id()) {
            Some(existing) => {
                for pair in fk.column_pairs {
                    existing.merge_pair(pair);
                }
            }
            None => {
                self.foreign_keys.insert(fk.composite_id(), fk);
            }
        }
    }

    /// Adds an index unless an identical definition exists.
    pub(crate) fn add_index(&mut self, index: IndexInfo) {
        if !self.indices.contains(&index) {
            self.indices.push(index);
        }
    }

    /// Checks the table invariants.
    pub fn validate(&self) -> Result<()> {
        for system in [ID_COLUMN, CREATED_COLUMN, MODIFIED_COLUMN, DELETED_COLUMN] {
            if !self.has_column(system) {
                return Err(Error::InvalidState(format!(
                    "Table '{}' is missing system column '{system}'",
                    self.name
                )));
            }
        }
        if self.primary_key.is_empty() {
            return Err(Error::InvalidState(format!(
                "Table '{}' has an empty primary key",
                self.name
            )));
        }
        for pk in &self.primary_key {
            if !self.has_column(pk) {
                return Err(Error::no_such_column(&self.name, pk));
            }
        }
        for fk in self.foreign_keys.values() {
            for local in fk.local_columns() {
                if !self.has_column(local) {
                    return Err(Error::no_such_column(&self.name, local));
                }
            }
        }
        for index in &self.indices {
            for column in &index.columns {
                if !self.has_column(column) {
                    return Err(Error::no_such_column(&self.name, column));
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`TableInfo`].
#[derive(Debug, Clone)]
pub struct TableInfoBuilder {
    table: TableInfo,
}

impl TableInfoBuilder {
    /// Adds (or replaces) a column. The column's table name is set to this table.
    #[must_use]
    pub fn column(mut self, mut column: ColumnInfo) -> Self {
        column.table_name.clone_from(&self.table.name);
        self.table.columns.insert(column.name.clone(), column);
        self
    }

    /// Replaces the primary key.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I, on_conflict: Option<ConflictResolution>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table.primary_key = columns.into_iter().map(Into::into).collect();
        self.table.primary_key_on_conflict = on_conflict;
        self
    }

    /// Adds a foreign key, merging with an existing one of the same composite id.
    #[must_use]
    pub fn foreign_key(mut self, mut fk: ForeignKeyInfo) -> Self {
        fk.table_name.clone_from(&self.table.name);
        for local in fk.local_columns() {
            if let Some(column) = self.table.columns.get_mut(local) {
                column.foreign_key = true;
            }
        }
        self.table.upsert_foreign_key(fk);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, mut index: IndexInfo) -> Self {
        index.table_name.clone_from(&self.table.name);
        for name in &index.columns {
            if let Some(column) = self.table.columns.get_mut(name) {
                column.index = true;
            }
        }
        self.table.add_index(index);
        self
    }

    /// Sets the static data asset reference.
    #[must_use]
    pub fn static_data(mut self, asset: impl Into<String>, record_name: impl Into<String>) -> Self {
        self.table.static_data_asset = Some(asset.into());
        self.table.static_data_record_name = Some(record_name.into());
        self
    }

    /// Validates and returns the table.
    pub fn build(self) -> Result<TableInfo> {
        self.table.validate()?;
        Ok(self.table)
    }
}

/// The complete database schema, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: BTreeMap<String, TableInfo>,
}

impl Schema {
    /// Creates a new empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to the schema.
    #[must_use]
    pub fn table(mut self, table: TableInfo) -> Self {
        self.insert(table);
        self
    }

    /// Inserts or replaces a table.
    pub fn insert(&mut self, table: TableInfo) -> Option<TableInfo> {
        self.tables.insert(table.name.clone(), table)
    }

    /// Removes a table.
    pub fn remove(&mut self, name: &str) -> Option<TableInfo> {
        self.tables.remove(name)
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    /// Gets a mutable table by name.
    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut TableInfo> {
        self.tables.get_mut(name)
    }

    /// Gets a table by name or fails with [`Error::InvalidArgument`].
    pub fn require_table(&self, name: &str) -> Result<&TableInfo> {
        self.get_table(name).ok_or_else(|| {
            Error::InvalidArgument(format!("Table '{name}' is not part of the schema"))
        })
    }

    /// Whether the schema contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the schema has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
