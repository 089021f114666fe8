//! State reconstruction from migrations.
//!
//! Replays migration sets in ascending version order to rebuild the logical
//! schema the database is expected to have at a given version. Later
//! migrations for the same table or column override earlier ones.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::migration::{Migration, MigrationSet};
use crate::schema::{is_system_column, ColumnPair, ForeignKeyInfo, IndexInfo, Schema, TableInfo};

/// Reconstructs a schema from migration sets.
#[derive(Debug, Clone, Default)]
pub struct SchemaState {
    schema: Schema,
    db_version: Option<u32>,
}

impl SchemaState {
    /// Creates a new empty schema state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Consumes and returns the schema.
    #[must_use]
    pub fn into_schema(self) -> Schema {
        self.schema
    }

    /// Version of the last applied set.
    #[must_use]
    pub fn db_version(&self) -> Option<u32> {
        self.db_version
    }

    /// Applies every migration of `set`, then checks the set's target snapshot.
    pub fn apply_set(&mut self, set: &MigrationSet) -> Result<()> {
        if let Some(previous) = self.db_version {
            if set.db_version <= previous {
                return Err(Error::VersionOrder {
                    previous,
                    next: set.db_version,
                });
            }
        }

        for migration in &set.migrations {
            debug!(
                db_version = set.db_version,
                migration = migration.type_name(),
                table = %migration.table(),
                "Replaying migration"
            );
            self.apply_migration(migration)?;
        }

        for table in self.schema.tables() {
            table.validate()?;
        }

        if let Some(expected) = &set.target_schema {
            if *expected != self.schema {
                return Err(Error::SchemaMismatch {
                    db_version: set.db_version,
                });
            }
        }

        self.db_version = Some(set.db_version);
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableInfo> {
        self.schema
            .get_table_mut(name)
            .ok_or_else(|| Error::no_such_table(name))
    }

    /// Applies a single migration to the schema state.
    pub fn apply_migration(&mut self, migration: &Migration) -> Result<()> {
        match migration {
            Migration::CreateTable {
                table,
                static_data_asset,
                static_data_record_name,
            } => {
                if self.schema.contains(table) {
                    return Err(Error::InvalidState(format!(
                        "Table '{table}' already exists"
                    )));
                }
                let mut created = TableInfo::new(table.clone());
                created.static_data_asset.clone_from(static_data_asset);
                created
                    .static_data_record_name
                    .clone_from(static_data_record_name);
                self.schema.insert(created);
            }

            Migration::AddColumn {
                table,
                column,
                spec,
            } => {
                let t = self.table_mut(table)?;
                t.columns
                    .insert(column.clone(), spec.to_column(table, column));
                if spec.index {
                    t.add_index(IndexInfo::new(table.clone(), vec![column.clone()]));
                }
            }

            Migration::AddIndex {
                table,
                columns,
                order,
                unique,
            } => {
                let t = self.table_mut(table)?;
                for name in columns {
                    let column = t
                        .columns
                        .get_mut(name)
                        .ok_or_else(|| Error::no_such_column(table, name))?;
                    column.index = true;
                }

                // A unique single-column index is the column's UNIQUE constraint.
                match (columns.as_slice(), unique) {
                    ([single], true) => {
                        if let Some(column) = t.columns.get_mut(single) {
                            column.unique = true;
                        }
                    }
                    _ => {
                        let mut index = IndexInfo::new(table.clone(), columns.clone()).order(*order);
                        index.unique = *unique;
                        t.add_index(index);
                    }
                }
            }

            Migration::AddForeignKeyReference {
                table,
                column,
                spec,
                foreign_table,
                foreign_column,
                update_action,
                delete_action,
            } => {
                let t = self.table_mut(table)?;
                let local = t
                    .columns
                    .entry(column.clone())
                    .or_insert_with(|| spec.to_column(table, column));
                local.foreign_key = true;

                let fk = ForeignKeyInfo::new(table.clone(), foreign_table.clone())
                    .column_pair(column.clone(), foreign_column.clone())
                    .on_update(*update_action)
                    .on_delete(*delete_action);
                t.upsert_foreign_key(fk);
            }

            Migration::UpdateForeignKeys {
                table,
                foreign_keys,
            } => {
                let t = self.table_mut(table)?;
                for fk in foreign_keys {
                    let mut fk = fk.clone();
                    fk.table_name.clone_from(table);
                    for local in fk.local_columns() {
                        let column = t
                            .columns
                            .get_mut(local)
                            .ok_or_else(|| Error::no_such_column(table, local))?;
                        column.foreign_key = true;
                    }
                    t.foreign_keys.insert(fk.composite_id(), fk);
                }
            }

            Migration::DropForeignKey {
                table,
                foreign_table,
            } => {
                let t = self.table_mut(table)?;
                t.foreign_keys
                    .retain(|_, fk| fk.foreign_table_name != *foreign_table);
                refresh_foreign_key_flags(t);
            }

            Migration::UpdatePrimaryKey {
                table,
                columns,
                on_conflict,
            } => {
                let t = self.table_mut(table)?;
                if let Some(missing) = columns.iter().find(|c| !t.has_column(c)) {
                    return Err(Error::no_such_column(table, missing));
                }
                t.primary_key = columns.iter().cloned().collect();
                t.primary_key_on_conflict = *on_conflict;
            }

            Migration::ChangeDefaultValue {
                table,
                column,
                default_value,
            } => {
                let t = self.table_mut(table)?;
                let c = t
                    .columns
                    .get_mut(column)
                    .ok_or_else(|| Error::no_such_column(table, column))?;
                c.default_value.clone_from(default_value);
            }

            Migration::MakeColumnUnique {
                table,
                column,
                unique,
            } => {
                let t = self.table_mut(table)?;
                let c = t
                    .columns
                    .get_mut(column)
                    .ok_or_else(|| Error::no_such_column(table, column))?;
                c.unique = *unique;
            }

            Migration::RenameColumn {
                table,
                column,
                new_name,
            } => {
                if is_system_column(column) || is_system_column(new_name) {
                    return Err(Error::InvalidState(format!(
                        "Cannot rename system column '{column}' of table '{table}'"
                    )));
                }
                let t = self.table_mut(table)?;
                if t.has_column(new_name) {
                    return Err(Error::InvalidState(format!(
                        "Column '{new_name}' already exists in table '{table}'"
                    )));
                }
                let mut renamed = t
                    .columns
                    .remove(column)
                    .ok_or_else(|| Error::no_such_column(table, column))?;
                renamed.name.clone_from(new_name);
                t.columns.insert(new_name.clone(), renamed);

                if t.primary_key.remove(column) {
                    t.primary_key.insert(new_name.clone());
                }
                for fk in t.foreign_keys.values_mut() {
                    for pair in &mut fk.column_pairs {
                        if pair.local == *column {
                            pair.local.clone_from(new_name);
                        }
                    }
                }
                for index in &mut t.indices {
                    for indexed in &mut index.columns {
                        if indexed == column {
                            indexed.clone_from(new_name);
                        }
                    }
                }
                self.rename_foreign_column(table, column, new_name);
            }

            Migration::DropColumn { table, column } => {
                if is_system_column(column) {
                    return Err(Error::InvalidState(format!(
                        "Cannot drop system column '{column}' of table '{table}'"
                    )));
                }
                let t = self.table_mut(table)?;
                if t.primary_key.contains(column) {
                    return Err(Error::InvalidState(format!(
                        "Cannot drop primary key column '{column}' of table '{table}'"
                    )));
                }
                if t.columns.remove(column).is_none() {
                    return Err(Error::no_such_column(table, column));
                }
                for fk in t.foreign_keys.values_mut() {
                    fk.column_pairs.retain(|pair| pair.local != *column);
                }
                t.foreign_keys.retain(|_, fk| !fk.column_pairs.is_empty());
                t.indices.retain(|index| !index.columns.contains(column));
            }

            Migration::RenameTable { table, new_name } => {
                if self.schema.contains(new_name) {
                    return Err(Error::InvalidState(format!(
                        "Table '{new_name}' already exists"
                    )));
                }
                let mut renamed = self
                    .schema
                    .remove(table)
                    .ok_or_else(|| Error::no_such_table(table))?;
                renamed.name.clone_from(new_name);
                for column in renamed.columns.values_mut() {
                    column.table_name.clone_from(new_name);
                }
                for index in &mut renamed.indices {
                    index.table_name.clone_from(new_name);
                }
                self.schema.insert(renamed);
                self.retarget_foreign_keys(table, new_name);
            }

            Migration::DropTable { table } => {
                if self.schema.remove(table).is_none() {
                    return Err(Error::no_such_table(table));
                }
            }
        }

        Ok(())
    }

    /// Points foreign keys at `old` to `new`, including the renamed table's own.
    fn retarget_foreign_keys(&mut self, old: &str, new: &str) {
        let names: Vec<String> = self.schema.table_names().map(ToString::to_string).collect();
        for name in names {
            let Some(t) = self.schema.get_table_mut(&name) else {
                continue;
            };
            let keys = std::mem::take(&mut t.foreign_keys);
            for (_, mut fk) in keys {
                fk.table_name.clone_from(&t.name);
                if fk.foreign_table_name == old {
                    fk.foreign_table_name = new.to_string();
                }
                t.upsert_foreign_key(fk);
            }
        }
    }

    /// Follows a column rename in every foreign key referencing that column.
    fn rename_foreign_column(&mut self, table: &str, old: &str, new: &str) {
        let names: Vec<String> = self.schema.table_names().map(ToString::to_string).collect();
        for name in names {
            if let Some(t) = self.schema.get_table_mut(&name) {
                for fk in t.foreign_keys.values_mut() {
                    if fk.foreign_table_name != table {
                        continue;
                    }
                    for ColumnPair { foreign, .. } in &mut fk.column_pairs {
                        if foreign == old {
                            *foreign = new.to_string();
                        }
                    }
                }
            }
        }
    }

    /// Applies multiple sets in order.
    pub fn apply_sets(&mut self, sets: &[MigrationSet]) -> Result<()> {
        for set in sets {
            self.apply_set(set)?;
        }
        Ok(())
    }

    /// Reconstructs state from migration sets, sorting them by version first.
    pub fn from_sets(sets: &[MigrationSet]) -> Result<Self> {
        let mut ordered: Vec<&MigrationSet> = sets.iter().collect();
        ordered.sort_by_key(|s| s.db_version);

        let mut state = Self::new();
        for set in ordered {
            state.apply_set(set)?;
        }
        info!(
            tables = state.schema.len(),
            db_version = ?state.db_version,
            "Reconstructed schema from migrations"
        );
        Ok(state)
    }
}

fn refresh_foreign_key_flags(table: &mut TableInfo) {
    let referencing: Vec<String> = table
        .foreign_keys
        .values()
        .flat_map(|fk| fk.local_columns().map(ToString::to_string))
        .collect();
    for column in table.columns.values_mut() {
        column.foreign_key = referencing.contains(&column.name);
    }
}

/// Replays `sets` and returns the resulting schema. An empty list yields an empty schema.
pub fn replay(sets: &[MigrationSet]) -> Result<Schema> {
    Ok(SchemaState::from_sets(sets)?.into_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::ColumnSpec;
    use crate::schema::{ForeignKeyAction, QualifiedType};

    fn create_users() -> MigrationSet {
        MigrationSet::new(1)
            .migration(Migration::create_table("users"))
            .migration(Migration::add_column(
                "users",
                "name",
                ColumnSpec::new(QualifiedType::String),
            ))
    }

    fn add_posts() -> MigrationSet {
        MigrationSet::new(2)
            .migration(Migration::create_table("posts"))
            .migration(Migration::AddForeignKeyReference {
                table: "posts".into(),
                column: "user_id".into(),
                spec: ColumnSpec::new(QualifiedType::Long),
                foreign_table: "users".into(),
                foreign_column: "_id".into(),
                update_action: ForeignKeyAction::Cascade,
                delete_action: ForeignKeyAction::Cascade,
            })
    }

    #[test]
    fn test_empty_replay() {
        assert!(replay(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_create_table_and_add_column() {
        let schema = replay(&[create_users()]).unwrap();
        let users = schema.get_table("users").unwrap();
        assert_eq!(users.columns.len(), 5);
        assert_eq!(
            users.get_column("name").unwrap().qualified_type,
            QualifiedType::String
        );
    }

    #[test]
    fn test_replay_is_idempotent_and_order_independent() {
        let first = replay(&[create_users(), add_posts()]).unwrap();
        let second = replay(&[add_posts(), create_users()]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, replay(&[create_users(), add_posts()]).unwrap());
    }

    #[test]
    fn test_foreign_key_reference_adds_column() {
        let schema = replay(&[create_users(), add_posts()]).unwrap();
        let posts = schema.get_table("posts").unwrap();
        assert!(posts.get_column("user_id").unwrap().foreign_key);
        assert_eq!(posts.foreign_keys.len(), 1);
    }

    #[test]
    fn test_composite_foreign_key_collapses() {
        let fk = |column: &str| Migration::AddForeignKeyReference {
            table: "t2".into(),
            column: column.into(),
            spec: ColumnSpec::new(QualifiedType::Long),
            foreign_table: "t1".into(),
            foreign_column: column.into(),
            update_action: ForeignKeyAction::Cascade,
            delete_action: ForeignKeyAction::Cascade,
        };
        let set = MigrationSet::new(1)
            .migration(Migration::create_table("t2"))
            .migration(fk("c1"))
            .migration(fk("c2"));

        let schema = replay(&[set]).unwrap();
        let t2 = schema.get_table("t2").unwrap();
        assert_eq!(t2.foreign_keys.len(), 1);
        let key = t2.foreign_keys.values().next().unwrap();
        assert_eq!(key.column_pairs.len(), 2);
    }

    #[test]
    fn test_change_default_preserves_other_attributes() {
        let set = MigrationSet::new(2).migration(Migration::ChangeDefaultValue {
            table: "users".into(),
            column: "name".into(),
            default_value: Some("anonymous".into()),
        });
        let mut state = SchemaState::new();
        state.apply_set(&create_users()).unwrap();
        state
            .apply_migration(&Migration::MakeColumnUnique {
                table: "users".into(),
                column: "name".into(),
                unique: true,
            })
            .unwrap();
        state.apply_set(&set).unwrap();

        let name = state.schema().get_table("users").unwrap().get_column("name").unwrap();
        assert_eq!(name.default_value.as_deref(), Some("anonymous"));
        assert!(name.unique);
        assert_eq!(name.qualified_type, QualifiedType::String);
    }

    #[test]
    fn test_later_add_column_overrides_earlier() {
        let set = MigrationSet::new(2).migration(Migration::add_column(
            "users",
            "name",
            ColumnSpec::new(QualifiedType::String).default_value("x"),
        ));
        let schema = replay(&[create_users(), set]).unwrap();
        let name = schema.get_table("users").unwrap().get_column("name").unwrap();
        assert_eq!(name.default_value.as_deref(), Some("x"));
    }

    #[test]
    fn test_update_primary_key() {
        let set = MigrationSet::new(2).migration(Migration::UpdatePrimaryKey {
            table: "users".into(),
            columns: vec!["name".into()],
            on_conflict: Some(crate::schema::ConflictResolution::Replace),
        });
        let schema = replay(&[create_users(), set]).unwrap();
        let users = schema.get_table("users").unwrap();
        assert!(users.primary_key.contains("name"));
        assert!(!users.has_default_primary_key());
    }

    #[test]
    fn test_update_primary_key_unknown_column() {
        let set = MigrationSet::new(2).migration(Migration::UpdatePrimaryKey {
            table: "users".into(),
            columns: vec!["missing".into()],
            on_conflict: None,
        });
        assert!(matches!(
            replay(&[create_users(), set]),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_rename_column_follows_references() {
        let rename = MigrationSet::new(3)
            .migration(Migration::rename_column("posts", "user_id", "author_id"));
        let schema = replay(&[create_users(), add_posts(), rename]).unwrap();

        let posts = schema.get_table("posts").unwrap();
        assert!(posts.has_column("author_id"));
        assert!(!posts.has_column("user_id"));
        let fk = posts.foreign_keys.values().next().unwrap();
        assert_eq!(fk.local_columns().collect::<Vec<_>>(), vec!["author_id"]);
    }

    #[test]
    fn test_rename_table_retargets_foreign_keys() {
        let rename = MigrationSet::new(3).migration(Migration::RenameTable {
            table: "users".into(),
            new_name: "accounts".into(),
        });
        let schema = replay(&[create_users(), add_posts(), rename]).unwrap();

        assert!(schema.get_table("users").is_none());
        let accounts = schema.get_table("accounts").unwrap();
        assert_eq!(accounts.get_column("name").unwrap().table_name, "accounts");
        let fk = schema
            .get_table("posts")
            .unwrap()
            .foreign_keys
            .values()
            .next()
            .unwrap();
        assert_eq!(fk.foreign_table_name, "accounts");
    }

    #[test]
    fn test_drop_column_removes_foreign_key() {
        let drop = MigrationSet::new(3).migration(Migration::DropColumn {
            table: "posts".into(),
            column: "user_id".into(),
        });
        let schema = replay(&[create_users(), add_posts(), drop]).unwrap();
        assert!(schema.get_table("posts").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_drop_system_column_fails() {
        let drop = MigrationSet::new(2).migration(Migration::DropColumn {
            table: "users".into(),
            column: "modified".into(),
        });
        assert!(replay(&[create_users(), drop]).is_err());
    }

    #[test]
    fn test_duplicate_table_error() {
        let mut state = SchemaState::new();
        state.apply_set(&create_users()).unwrap();
        let result = state.apply_migration(&Migration::create_table("users"));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_missing_table_error() {
        let result = SchemaState::new().apply_migration(&Migration::add_column(
            "nonexistent",
            "col",
            ColumnSpec::new(QualifiedType::String),
        ));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_duplicate_version_error() {
        let result = replay(&[create_users(), MigrationSet::new(1)]);
        assert!(matches!(result, Err(Error::VersionOrder { .. })));
    }

    #[test]
    fn test_target_schema_mismatch() {
        let set = create_users().target_schema(Schema::new());
        assert!(matches!(
            replay(&[set]),
            Err(Error::SchemaMismatch { db_version: 1 })
        ));

        let expected = replay(&[create_users()]).unwrap();
        assert!(replay(&[create_users().target_schema(expected)]).is_ok());
    }
}
