//! The migration log.
//!
//! A [`Migration`] is one atomic schema change. Migrations that advance the
//! database from one version to the next are grouped into a
//! [`MigrationSet`]. In memory every migration is a typed enum variant; the
//! string-keyed attribute bag only exists in [`RawMigration`], the JSON
//! manifest representation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{
    ColumnInfo, ConflictResolution, ForeignKeyAction, ForeignKeyInfo, QualifiedType, Schema,
    SortOrder,
};

/// Attributes of a column added by a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Declared type.
    pub qualified_type: QualifiedType,
    /// Raw default literal.
    pub default_value: Option<String>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the column is unique.
    pub unique: bool,
    /// Whether the column is indexed.
    pub index: bool,
}

impl ColumnSpec {
    /// A nullable, non-unique column of the given type.
    #[must_use]
    pub fn new(qualified_type: QualifiedType) -> Self {
        Self {
            qualified_type,
            default_value: None,
            nullable: true,
            unique: false,
            index: false,
        }
    }

    /// Sets the raw default literal.
    #[must_use]
    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    /// Disallows NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Makes the column unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builds the column for `table`.
    #[must_use]
    pub fn to_column(&self, table: &str, name: &str) -> ColumnInfo {
        ColumnInfo {
            table_name: table.to_string(),
            name: name.to_string(),
            qualified_type: self.qualified_type,
            nullable: self.nullable,
            default_value: self.default_value.clone(),
            unique: self.unique,
            index: self.index,
            foreign_key: false,
        }
    }
}

/// One atomic schema-changing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Migration {
    /// Create a table holding only the system columns.
    CreateTable {
        /// Table name.
        table: String,
        /// Static data asset reference.
        static_data_asset: Option<String>,
        /// Record element name inside the static data asset.
        static_data_record_name: Option<String>,
    },
    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Column attributes.
        spec: ColumnSpec,
    },
    /// Add an index.
    AddIndex {
        /// Table name.
        table: String,
        /// Indexed columns.
        columns: Vec<String>,
        /// Sort order.
        order: SortOrder,
        /// Whether the index is unique.
        unique: bool,
    },
    /// Add a column referencing another table, merged into the composite key
    /// identified by (table, foreign table, update action, delete action).
    AddForeignKeyReference {
        /// Table name.
        table: String,
        /// Local column name.
        column: String,
        /// Local column attributes, used when the column does not exist yet.
        spec: ColumnSpec,
        /// Referenced table.
        foreign_table: String,
        /// Referenced column.
        foreign_column: String,
        /// Update action.
        update_action: ForeignKeyAction,
        /// Delete action.
        delete_action: ForeignKeyAction,
    },
    /// Add or replace foreign keys by composite id.
    UpdateForeignKeys {
        /// Table name.
        table: String,
        /// Keys to upsert.
        foreign_keys: Vec<ForeignKeyInfo>,
    },
    /// Remove every foreign key from `table` to `foreign_table`.
    DropForeignKey {
        /// Table name.
        table: String,
        /// Referenced table.
        foreign_table: String,
    },
    /// Replace the primary key.
    UpdatePrimaryKey {
        /// Table name.
        table: String,
        /// New primary key columns.
        columns: Vec<String>,
        /// New ON CONFLICT resolution.
        on_conflict: Option<ConflictResolution>,
    },
    /// Replace a column's default.
    ChangeDefaultValue {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New raw default literal.
        default_value: Option<String>,
    },
    /// Set a column's uniqueness flag.
    MakeColumnUnique {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New uniqueness flag.
        unique: bool,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        column: String,
        /// New column name.
        new_name: String,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a table.
    RenameTable {
        /// Current table name.
        table: String,
        /// New table name.
        new_name: String,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
}

impl Migration {
    /// Manifest type tag of this migration.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "CREATE_TABLE",
            Self::AddColumn { .. } => "ALTER_TABLE_ADD_COLUMN",
            Self::AddIndex { unique: false, .. } => "ADD_INDEX",
            Self::AddIndex { unique: true, .. } => "ADD_UNIQUE_INDEX",
            Self::AddForeignKeyReference { .. } => "ADD_FOREIGN_KEY_REFERENCE",
            Self::UpdateForeignKeys { .. } => "UPDATE_FOREIGN_KEYS",
            Self::DropForeignKey { .. } => "DROP_FOREIGN_KEY",
            Self::UpdatePrimaryKey { .. } => "UPDATE_PRIMARY_KEY",
            Self::ChangeDefaultValue { .. } => "CHANGE_DEFAULT_VALUE",
            Self::MakeColumnUnique { .. } => "MAKE_COLUMN_UNIQUE",
            Self::RenameColumn { .. } => "RENAME_COLUMN",
            Self::DropColumn { .. } => "DROP_COLUMN",
            Self::RenameTable { .. } => "RENAME_TABLE",
            Self::DropTable { .. } => "DROP_TABLE",
        }
    }

    /// The table this migration applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::AddForeignKeyReference { table, .. }
            | Self::UpdateForeignKeys { table, .. }
            | Self::DropForeignKey { table, .. }
            | Self::UpdatePrimaryKey { table, .. }
            | Self::ChangeDefaultValue { table, .. }
            | Self::MakeColumnUnique { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameTable { table, .. }
            | Self::DropTable { table } => table,
        }
    }

    /// Creates a table.
    #[must_use]
    pub fn create_table(table: impl Into<String>) -> Self {
        Self::CreateTable {
            table: table.into(),
            static_data_asset: None,
            static_data_record_name: None,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: impl Into<String>, spec: ColumnSpec) -> Self {
        Self::AddColumn {
            table: table.into(),
            column: column.into(),
            spec,
        }
    }

    /// Renames a column.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        column: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            column: column.into(),
            new_name: new_name.into(),
        }
    }
}

/// All migrations advancing the schema to `db_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSet {
    /// Database version reached after applying the set.
    pub db_version: u32,
    /// Ordered migrations.
    pub migrations: Vec<Migration>,
    /// Expected schema after the set, if recorded.
    pub target_schema: Option<Schema>,
}

impl MigrationSet {
    /// Creates an empty set for `db_version`.
    #[must_use]
    pub fn new(db_version: u32) -> Self {
        Self {
            db_version,
            migrations: Vec::new(),
            target_schema: None,
        }
    }

    /// Appends a migration.
    #[must_use]
    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Records the expected schema after this set.
    #[must_use]
    pub fn target_schema(mut self, schema: Schema) -> Self {
        self.target_schema = Some(schema);
        self
    }

    /// Column renames in this set, keyed by table, each mapping old name to new name.
    ///
    /// Chained renames (`a -> b`, then `b -> c`) collapse into `a -> c`, and
    /// renames are reported under the table's name at the end of the set.
    #[must_use]
    pub fn column_renames(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut renames: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for migration in &self.migrations {
            match migration {
                Migration::RenameColumn {
                    table,
                    column,
                    new_name,
                } => {
                    let table_renames = renames.entry(table.clone()).or_default();
                    let original = table_renames
                        .iter()
                        .find(|(_, current)| *current == column)
                        .map(|(old, _)| old.clone())
                        .unwrap_or_else(|| column.clone());
                    table_renames.insert(original, new_name.clone());
                }
                Migration::RenameTable { table, new_name } => {
                    if let Some(moved) = renames.remove(table) {
                        renames.insert(new_name.clone(), moved);
                    }
                }
                _ => {}
            }
        }
        renames
    }

    /// Table renames in this set, mapping the name before the set to the name after it.
    #[must_use]
    pub fn table_renames(&self) -> BTreeMap<String, String> {
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        for migration in &self.migrations {
            if let Migration::RenameTable { table, new_name } = migration {
                let original = renames
                    .iter()
                    .find(|(_, current)| *current == table)
                    .map(|(old, _)| old.clone())
                    .unwrap_or_else(|| table.clone());
                renames.insert(original, new_name.clone());
            }
        }
        renames
    }
}

// =============================================================================
// Manifest representation
// =============================================================================

/// A migration as stored in a JSON manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMigration {
    /// Migration type tag.
    #[serde(rename = "type")]
    pub migration_type: String,
    /// Table name.
    pub table_name: String,
    /// Column name, for column-level migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    /// Type-specific attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A migration set as stored in a JSON manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMigrationSet {
    /// Database version.
    pub db_version: u32,
    /// Migrations.
    #[serde(default)]
    pub migrations: Vec<RawMigration>,
    /// Expected schema after the set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_schema: Option<Schema>,
}

struct Attributes<'a> {
    migration_type: &'static str,
    raw: &'a RawMigration,
}

impl<'a> Attributes<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.raw.attributes.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&'a str> {
        self.get(key).ok_or(Error::MissingAttribute {
            migration_type: self.migration_type,
            attribute: key,
        })
    }

    fn column(&self) -> Result<String> {
        self.raw
            .column_name
            .clone()
            .ok_or(Error::MissingAttribute {
                migration_type: self.migration_type,
                attribute: "columnName",
            })
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse::<bool>()
                .map_err(|_| Error::invalid_attribute(key, v)),
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
    }

    fn column_spec(&self) -> Result<ColumnSpec> {
        Ok(ColumnSpec {
            qualified_type: self.require("column_type")?.parse()?,
            default_value: self.get("default").map(ToString::to_string),
            nullable: self.flag("nullable", true)?,
            unique: self.flag("unique", false)?,
            index: self.flag("index", false)?,
        })
    }

    fn action(&self, key: &str) -> Result<ForeignKeyAction> {
        self.get(key).map_or(Ok(ForeignKeyAction::NoAction), str::parse)
    }
}

const MIGRATION_TYPES: [&str; 15] = [
    "CREATE_TABLE",
    "ALTER_TABLE_ADD_COLUMN",
    "ADD_INDEX",
    "ADD_UNIQUE_INDEX",
    "ADD_FOREIGN_KEY_REFERENCE",
    "UPDATE_FOREIGN_KEYS",
    "DROP_FOREIGN_KEY",
    "UPDATE_PRIMARY_KEY",
    "CHANGE_DEFAULT_VALUE",
    "MAKE_COLUMN_UNIQUE",
    "RENAME_COLUMN",
    "DROP_COLUMN",
    "RENAME_TABLE",
    "DROP_TABLE",
    "ALTER_TABLE_ADD_UNIQUE",
];

impl TryFrom<RawMigration> for Migration {
    type Error = Error;

    fn try_from(raw: RawMigration) -> Result<Self> {
        let migration_type = MIGRATION_TYPES
            .into_iter()
            .find(|t| *t == raw.migration_type)
            .ok_or_else(|| Error::invalid_attribute("type", &raw.migration_type))?;
        let attrs = Attributes {
            migration_type,
            raw: &raw,
        };
        let table = raw.table_name.clone();

        let migration = match migration_type {
            "CREATE_TABLE" => Self::CreateTable {
                table,
                static_data_asset: attrs.get("static_data_asset").map(ToString::to_string),
                static_data_record_name: attrs
                    .get("static_data_record_name")
                    .map(ToString::to_string),
            },
            "ALTER_TABLE_ADD_COLUMN" => Self::AddColumn {
                table,
                column: attrs.column()?,
                spec: attrs.column_spec()?,
            },
            // Older manifests record unique columns as a separate add type.
            "ALTER_TABLE_ADD_UNIQUE" => Self::AddColumn {
                table,
                column: attrs.column()?,
                spec: attrs.column_spec()?.unique(),
            },
            "ADD_INDEX" | "ADD_UNIQUE_INDEX" => {
                let columns = match attrs.list("index_columns") {
                    Some(columns) if !columns.is_empty() => columns,
                    _ => vec![attrs.column()?],
                };
                Self::AddIndex {
                    table,
                    columns,
                    order: attrs.get("sort_order").unwrap_or_default().parse()?,
                    unique: migration_type == "ADD_UNIQUE_INDEX",
                }
            }
            "ADD_FOREIGN_KEY_REFERENCE" => Self::AddForeignKeyReference {
                table,
                column: attrs.column()?,
                spec: match attrs.get("column_type") {
                    Some(_) => attrs.column_spec()?,
                    None => ColumnSpec::new(QualifiedType::Long),
                },
                foreign_table: attrs.require("foreign_table_name")?.to_string(),
                foreign_column: attrs.require("foreign_column_name")?.to_string(),
                update_action: attrs.action("update_action")?,
                delete_action: attrs.action("delete_action")?,
            },
            "UPDATE_FOREIGN_KEYS" => {
                let foreign_keys = attrs
                    .require("foreign_keys")?
                    .split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|encoded| ForeignKeyInfo::parse(&table, encoded))
                    .collect::<Result<Vec<_>>>()?;
                Self::UpdateForeignKeys {
                    table,
                    foreign_keys,
                }
            }
            "DROP_FOREIGN_KEY" => Self::DropForeignKey {
                table,
                foreign_table: attrs.require("foreign_table_name")?.to_string(),
            },
            "UPDATE_PRIMARY_KEY" => Self::UpdatePrimaryKey {
                table,
                columns: attrs.list("primary_key").unwrap_or_default(),
                on_conflict: attrs
                    .get("primary_key_on_conflict")
                    .filter(|v| !v.trim().is_empty())
                    .map(str::parse::<ConflictResolution>)
                    .transpose()?,
            },
            "CHANGE_DEFAULT_VALUE" => Self::ChangeDefaultValue {
                table,
                column: attrs.column()?,
                default_value: attrs.get("default").map(ToString::to_string),
            },
            "MAKE_COLUMN_UNIQUE" => Self::MakeColumnUnique {
                table,
                column: attrs.column()?,
                unique: attrs.flag("unique", true)?,
            },
            "RENAME_COLUMN" => Self::RenameColumn {
                table,
                column: attrs.column()?,
                new_name: attrs.require("new_name")?.to_string(),
            },
            "DROP_COLUMN" => Self::DropColumn {
                table,
                column: attrs.column()?,
            },
            "RENAME_TABLE" => Self::RenameTable {
                table,
                new_name: attrs.require("new_name")?.to_string(),
            },
            _ => Self::DropTable { table },
        };

        if let Self::UpdatePrimaryKey { columns, .. } = &migration {
            if columns.is_empty() {
                return Err(Error::MissingAttribute {
                    migration_type,
                    attribute: "primary_key",
                });
            }
        }
        Ok(migration)
    }
}

fn column_spec_attributes(spec: &ColumnSpec, attributes: &mut BTreeMap<String, String>) {
    attributes.insert("column_type".into(), spec.qualified_type.name().into());
    if let Some(default) = &spec.default_value {
        attributes.insert("default".into(), default.clone());
    }
    if !spec.nullable {
        attributes.insert("nullable".into(), "false".into());
    }
    if spec.unique {
        attributes.insert("unique".into(), "true".into());
    }
    if spec.index {
        attributes.insert("index".into(), "true".into());
    }
}

impl From<&Migration> for RawMigration {
    fn from(migration: &Migration) -> Self {
        let mut attributes = BTreeMap::new();
        let mut column_name = None;

        match migration {
            Migration::CreateTable {
                static_data_asset,
                static_data_record_name,
                ..
            } => {
                if let Some(asset) = static_data_asset {
                    attributes.insert("static_data_asset".into(), asset.clone());
                }
                if let Some(record) = static_data_record_name {
                    attributes.insert("static_data_record_name".into(), record.clone());
                }
            }
            Migration::AddColumn { column, spec, .. } => {
                column_name = Some(column.clone());
                column_spec_attributes(spec, &mut attributes);
            }
            Migration::AddIndex { columns, order, .. } => {
                if let [single] = columns.as_slice() {
                    column_name = Some(single.clone());
                } else {
                    attributes.insert("index_columns".into(), columns.join(","));
                }
                if *order == SortOrder::Desc {
                    attributes.insert("sort_order".into(), "DESC".into());
                }
            }
            Migration::AddForeignKeyReference {
                column,
                spec,
                foreign_table,
                foreign_column,
                update_action,
                delete_action,
                ..
            } => {
                column_name = Some(column.clone());
                column_spec_attributes(spec, &mut attributes);
                attributes.insert("foreign_table_name".into(), foreign_table.clone());
                attributes.insert("foreign_column_name".into(), foreign_column.clone());
                attributes.insert("update_action".into(), update_action.to_string());
                attributes.insert("delete_action".into(), delete_action.to_string());
            }
            Migration::UpdateForeignKeys { foreign_keys, .. } => {
                let encoded: Vec<String> = foreign_keys.iter().map(ToString::to_string).collect();
                attributes.insert("foreign_keys".into(), encoded.join(";"));
            }
            Migration::DropForeignKey { foreign_table, .. } => {
                attributes.insert("foreign_table_name".into(), foreign_table.clone());
            }
            Migration::UpdatePrimaryKey {
                columns,
                on_conflict,
                ..
            } => {
                attributes.insert("primary_key".into(), columns.join(","));
                if let Some(resolution) = on_conflict {
                    attributes.insert("primary_key_on_conflict".into(), resolution.to_sql().into());
                }
            }
            Migration::ChangeDefaultValue {
                column,
                default_value,
                ..
            } => {
                column_name = Some(column.clone());
                if let Some(default) = default_value {
                    attributes.insert("default".into(), default.clone());
                }
            }
            Migration::MakeColumnUnique { column, unique, .. } => {
                column_name = Some(column.clone());
                attributes.insert("unique".into(), unique.to_string());
            }
            Migration::RenameColumn {
                column, new_name, ..
            } => {
                column_name = Some(column.clone());
                attributes.insert("new_name".into(), new_name.clone());
            }
            Migration::DropColumn { column, .. } => column_name = Some(column.clone()),
            Migration::RenameTable { new_name, .. } => {
                attributes.insert("new_name".into(), new_name.clone());
            }
            Migration::DropTable { .. } => {}
        }

        Self {
            migration_type: migration.type_name().to_string(),
            table_name: migration.table().to_string(),
            column_name,
            attributes,
        }
    }
}

impl TryFrom<RawMigrationSet> for MigrationSet {
    type Error = Error;

    fn try_from(raw: RawMigrationSet) -> Result<Self> {
        Ok(Self {
            db_version: raw.db_version,
            migrations: raw
                .migrations
                .into_iter()
                .map(Migration::try_from)
                .collect::<Result<_>>()?,
            target_schema: raw.target_schema,
        })
    }
}

impl From<&MigrationSet> for RawMigrationSet {
    fn from(set: &MigrationSet) -> Self {
        Self {
            db_version: set.db_version,
            migrations: set.migrations.iter().map(RawMigration::from).collect(),
            target_schema: set.target_schema.clone(),
        }
    }
}

/// Parses a manifest: a JSON array of migration sets, sorted by version on return.
pub fn parse_manifest(json: &str) -> Result<Vec<MigrationSet>> {
    let raw: Vec<RawMigrationSet> = serde_json::from_str(json)?;
    let mut sets = raw
        .into_iter()
        .map(MigrationSet::try_from)
        .collect::<Result<Vec<_>>>()?;
    sets.sort_by_key(|s| s.db_version);
    Ok(sets)
}

/// Reads and parses a manifest file.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<MigrationSet>> {
    let json = std::fs::read_to_string(path)?;
    parse_manifest(&json)
}

/// Serializes migration sets as a pretty-printed manifest.
pub fn to_manifest(sets: &[MigrationSet]) -> Result<String> {
    let raw: Vec<RawMigrationSet> = sets.iter().map(RawMigrationSet::from).collect();
    Ok(serde_json::to_string_pretty(&raw)?)
}
