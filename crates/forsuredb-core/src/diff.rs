//! Structural diff between two versions of a table.
//!
//! A diff is a pure function of the previous table (or its absence), the
//! target table (or its absence) and the column renames recorded when the
//! migration was authored. Renames are never inferred: a column that
//! disappears while another of the same type appears is a drop plus an add
//! unless the caller says otherwise.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{ConflictResolution, ForeignKeyInfo, IndexInfo, Schema, TableInfo};

/// Column renames for one table, old name to new name.
pub type ColumnRenames = BTreeMap<String, String>;

/// Top-level classification of a table diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    /// Both versions are structurally equal.
    Unchanged,
    /// The table is new.
    Created,
    /// The table exists in both versions and differs.
    Changed,
    /// The table was removed.
    Dropped,
}

impl DiffType {
    /// Returns the tag of this diff type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "UNCHANGED",
            Self::Created => "CREATED",
            Self::Changed => "CHANGED",
            Self::Dropped => "DROPPED",
        }
    }
}

/// One enriched sub-change of a [`DiffType::Changed`] diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    /// Columns present only in the target.
    AddColumns(BTreeSet<String>),
    /// Columns present only in the previous version.
    DropColumns(BTreeSet<String>),
    /// Columns renamed, old name to new name.
    RenameColumns(ColumnRenames),
    /// New default literals, keyed by (target) column name.
    DefaultChanged(BTreeMap<String, Option<String>>),
    /// New nullability, keyed by column name.
    NullabilityChanged(BTreeMap<String, bool>),
    /// New uniqueness flags, keyed by column name.
    UniqueChanged(BTreeMap<String, bool>),
    /// The primary key columns or their conflict resolution changed.
    PrimaryKeyChanged {
        /// New primary key.
        columns: BTreeSet<String>,
        /// New ON CONFLICT resolution.
        on_conflict: Option<ConflictResolution>,
    },
    /// Foreign keys only in the target.
    CreateForeignKeys(Vec<ForeignKeyInfo>),
    /// Foreign keys only in the previous version.
    DropForeignKeys(Vec<ForeignKeyInfo>),
    /// Indices only in the target.
    AddIndices(Vec<IndexInfo>),
    /// Indices only in the previous version.
    DropIndices(Vec<IndexInfo>),
}

fn join_map<V>(map: &BTreeMap<String, V>, value: impl Fn(&V) -> String) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={}", value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

impl TableChange {
    /// Tag of this change.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AddColumns(_) => "ADD_COLUMNS",
            Self::DropColumns(_) => "DROP_COLUMNS",
            Self::RenameColumns(_) => "RENAME_COLUMNS",
            Self::DefaultChanged(_) => "DEFAULT_CHANGED",
            Self::NullabilityChanged(_) => "NULLABILITY_CHANGED",
            Self::UniqueChanged(_) => "UNIQUE_CHANGED",
            Self::PrimaryKeyChanged { .. } => "PRIMARY_KEY_CHANGED",
            Self::CreateForeignKeys(_) => "CREATE_FK",
            Self::DropForeignKeys(_) => "DROP_FK",
            Self::AddIndices(_) => "ADD_INDICES",
            Self::DropIndices(_) => "DROP_INDICES",
        }
    }

    /// String encoding of the change payload, e.g. `old=new,a=b` for renames.
    #[must_use]
    pub fn attribute(&self) -> String {
        match self {
            Self::AddColumns(columns) | Self::DropColumns(columns) => {
                columns.iter().cloned().collect::<Vec<_>>().join(",")
            }
            Self::RenameColumns(renames) => join_map(renames, String::clone),
            Self::DefaultChanged(defaults) => {
                join_map(defaults, |d| d.clone().unwrap_or_default())
            }
            Self::NullabilityChanged(flags) | Self::UniqueChanged(flags) => {
                join_map(flags, ToString::to_string)
            }
            Self::PrimaryKeyChanged {
                columns,
                on_conflict,
            } => {
                let columns = columns.iter().cloned().collect::<Vec<_>>().join(",");
                match on_conflict {
                    Some(resolution) => format!("{columns}:{}", resolution.to_sql()),
                    None => columns,
                }
            }
            Self::CreateForeignKeys(keys) | Self::DropForeignKeys(keys) => keys
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
            Self::AddIndices(indices) | Self::DropIndices(indices) => indices
                .iter()
                .map(IndexInfo::name)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Structured difference between two versions of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Table name (the target name when both exist).
    pub table_name: String,
    /// Classification.
    pub diff_type: DiffType,
    /// Sub-changes; empty unless `diff_type` is [`DiffType::Changed`].
    pub changes: Vec<TableChange>,
    /// Added columns that are `NOT NULL` without a default, which
    /// `ALTER TABLE ... ADD COLUMN` cannot create.
    pub strict_additions: BTreeSet<String>,
}

impl SchemaDiff {
    fn new(table_name: &str, diff_type: DiffType) -> Self {
        Self {
            table_name: table_name.to_string(),
            diff_type,
            changes: Vec::new(),
            strict_additions: BTreeSet::new(),
        }
    }

    /// Finds the change with tag `kind`.
    #[must_use]
    pub fn change(&self, kind: &str) -> Option<&TableChange> {
        self.changes.iter().find(|c| c.kind() == kind)
    }

    /// Tag-to-encoding map of all sub-changes.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        self.changes
            .iter()
            .map(|c| (c.kind(), c.attribute()))
            .collect()
    }

    /// Columns added by this diff.
    #[must_use]
    pub fn added_columns(&self) -> BTreeSet<String> {
        match self.change("ADD_COLUMNS") {
            Some(TableChange::AddColumns(columns)) => columns.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Column renames, old name to new name.
    #[must_use]
    pub fn column_renames(&self) -> ColumnRenames {
        match self.change("RENAME_COLUMNS") {
            Some(TableChange::RenameColumns(renames)) => renames.clone(),
            _ => ColumnRenames::new(),
        }
    }

    /// Whether the only changes are new columns and indices over new columns,
    /// which `ALTER TABLE ... ADD COLUMN` plus `CREATE INDEX` can express.
    ///
    /// A new `NOT NULL` column without a default is not additive.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        if self.diff_type != DiffType::Changed || !self.strict_additions.is_empty() {
            return false;
        }
        let added = self.added_columns();
        !added.is_empty()
            && self.changes.iter().all(|change| match change {
                TableChange::AddColumns(_) => true,
                TableChange::AddIndices(indices) => indices
                    .iter()
                    .all(|index| index.columns.iter().any(|c| added.contains(c))),
                _ => false,
            })
    }

    /// Whether applying this diff needs the table to be recreated.
    #[must_use]
    pub fn requires_recreate(&self) -> bool {
        self.diff_type == DiffType::Changed && !self.is_additive()
    }
}

/// Diffs two versions of a table.
///
/// `renames` maps previous column names to target column names; entries that
/// do not describe a column present before under the old name and after under
/// the new one are ignored.
pub fn diff_table(
    previous: Option<&TableInfo>,
    target: Option<&TableInfo>,
    renames: &ColumnRenames,
) -> Result<SchemaDiff> {
    let (previous, target) = match (previous, target) {
        (None, None) => {
            return Err(Error::InvalidArgument(
                "Cannot diff a table that exists in neither version".to_string(),
            ))
        }
        (None, Some(t)) => return Ok(SchemaDiff::new(&t.name, DiffType::Created)),
        (Some(p), None) => return Ok(SchemaDiff::new(&p.name, DiffType::Dropped)),
        (Some(p), Some(t)) => (p, t),
    };

    let mut diff = SchemaDiff::new(&target.name, DiffType::Unchanged);
    if previous == target {
        return Ok(diff);
    }

    let renames: ColumnRenames = renames
        .iter()
        .filter(|(old, new)| {
            let valid = previous.has_column(old)
                && target.has_column(new)
                && !target.has_column(old)
                && !previous.has_column(new);
            if !valid {
                debug!(table = %target.name, old = %old, new = %new, "Ignoring rename");
            }
            valid
        })
        .map(|(old, new)| (old.clone(), new.clone()))
        .collect();
    let renamed_to: BTreeSet<&str> = renames.values().map(String::as_str).collect();

    let mut added = BTreeSet::new();
    let mut dropped = BTreeSet::new();
    let mut defaults = BTreeMap::new();
    let mut nullability = BTreeMap::new();
    let mut uniqueness = BTreeMap::new();

    for (name, column) in &target.columns {
        let counterpart = match renames.iter().find(|(_, new)| *new == name) {
            Some((old, _)) => previous.get_column(old),
            None if renamed_to.contains(name.as_str()) => None,
            None => previous.get_column(name),
        };
        let Some(before) = counterpart else {
            added.insert(name.clone());
            continue;
        };
        if before.qualified_type != column.qualified_type {
            // A type change cannot be carried over: drop and re-add.
            added.insert(name.clone());
            dropped.insert(before.name.clone());
            continue;
        }
        if before.default_value != column.default_value {
            defaults.insert(name.clone(), column.default_value.clone());
        }
        if before.nullable != column.nullable {
            nullability.insert(name.clone(), column.nullable);
        }
        if before.unique != column.unique {
            uniqueness.insert(name.clone(), column.unique);
        }
    }
    for name in previous.columns.keys() {
        if !target.has_column(name) && !renames.contains_key(name) {
            dropped.insert(name.clone());
        }
    }

    diff.strict_additions = added
        .iter()
        .filter(|name| {
            target
                .get_column(name)
                .is_some_and(|c| !c.nullable && c.default_value.is_none())
        })
        .cloned()
        .collect();
    if !added.is_empty() {
        diff.changes.push(TableChange::AddColumns(added));
    }
    if !dropped.is_empty() {
        diff.changes.push(TableChange::DropColumns(dropped));
    }
    if !renames.is_empty() {
        diff.changes.push(TableChange::RenameColumns(renames));
    }
    if !defaults.is_empty() {
        diff.changes.push(TableChange::DefaultChanged(defaults));
    }
    if !nullability.is_empty() {
        diff.changes.push(TableChange::NullabilityChanged(nullability));
    }
    if !uniqueness.is_empty() {
        diff.changes.push(TableChange::UniqueChanged(uniqueness));
    }

    if previous.primary_key != target.primary_key
        || previous.primary_key_on_conflict != target.primary_key_on_conflict
    {
        diff.changes.push(TableChange::PrimaryKeyChanged {
            columns: target.primary_key.clone(),
            on_conflict: target.primary_key_on_conflict,
        });
    }

    let created: Vec<ForeignKeyInfo> = target
        .foreign_keys
        .values()
        .filter(|fk| !previous.foreign_keys.values().any(|p| p == *fk))
        .cloned()
        .collect();
    let removed: Vec<ForeignKeyInfo> = previous
        .foreign_keys
        .values()
        .filter(|fk| !target.foreign_keys.values().any(|t| t == *fk))
        .cloned()
        .collect();
    if !created.is_empty() {
        diff.changes.push(TableChange::CreateForeignKeys(created));
    }
    if !removed.is_empty() {
        diff.changes.push(TableChange::DropForeignKeys(removed));
    }

    let new_indices: Vec<IndexInfo> = target
        .indices
        .iter()
        .filter(|i| !previous.indices.contains(i))
        .cloned()
        .collect();
    let old_indices: Vec<IndexInfo> = previous
        .indices
        .iter()
        .filter(|i| !target.indices.contains(i))
        .cloned()
        .collect();
    if !new_indices.is_empty() {
        diff.changes.push(TableChange::AddIndices(new_indices));
    }
    if !old_indices.is_empty() {
        diff.changes.push(TableChange::DropIndices(old_indices));
    }

    if !diff.changes.is_empty() {
        diff.diff_type = DiffType::Changed;
    }
    Ok(diff)
}

/// Diffs every table of two schemas, in table name order.
///
/// `renames` holds column renames keyed by target table name. Table renames
/// must already be applied to `previous`.
pub fn diff_schemas(
    previous: &Schema,
    target: &Schema,
    renames: &BTreeMap<String, ColumnRenames>,
) -> Result<Vec<SchemaDiff>> {
    let names: BTreeSet<&str> = previous.table_names().chain(target.table_names()).collect();
    let none = ColumnRenames::new();
    names
        .into_iter()
        .map(|name| {
            diff_table(
                previous.get_table(name),
                target.get_table(name),
                renames.get(name).unwrap_or(&none),
            )
        })
        .collect()
}
