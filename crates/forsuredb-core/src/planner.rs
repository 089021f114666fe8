//! Migration planning.
//!
//! Turns migration sets into the SQL that moves a database from one version
//! to the next. For each set the planner replays the previous schema, diffs
//! it against the schema after the set and picks a generator per table:
//!
//! 1. table renames, so later statements see the new names, each preceded
//!    by dropping a table whose name it takes over;
//! 2. created and changed tables, dependencies first;
//! 3. dropped tables, dependents first.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::diff::{diff_schemas, DiffType, SchemaDiff};
use crate::error::{Error, Result};
use crate::generator::{
    AddColumnsGenerator, CreateTableGenerator, DdlGenerator, DropTableGenerator,
    RecreateTableGenerator, TableRenameGenerator,
};
use crate::migration::{Migration, MigrationSet};
use crate::sort::best_effort_dag_sort;
use crate::state::SchemaState;

/// SQL statements that bring the database to `db_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionScript {
    /// Version reached after executing the statements.
    pub db_version: u32,
    /// Statements, in execution order.
    pub statements: Vec<String>,
}

impl VersionScript {
    /// Whether the set produced no SQL.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Plans SQL for successive migration sets.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlanner {
    state: SchemaState,
}

impl MigrationPlanner {
    /// Creates a planner starting from an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema reached after the sets planned so far.
    #[must_use]
    pub fn state(&self) -> &SchemaState {
        &self.state
    }

    /// Plans every set, in ascending version order.
    pub fn plan(sets: &[MigrationSet]) -> Result<Vec<VersionScript>> {
        let mut ordered: Vec<&MigrationSet> = sets.iter().collect();
        ordered.sort_by_key(|s| s.db_version);

        let mut planner = Self::new();
        ordered
            .into_iter()
            .map(|set| planner.plan_set(set))
            .collect()
    }

    /// Plans the SQL for `set` and advances the planner past it.
    pub fn plan_set(&mut self, set: &MigrationSet) -> Result<VersionScript> {
        let mut previous = self.state.clone();
        self.state.apply_set(set)?;

        // Renamed tables keep their rows; diff them under their new names.
        let mut statements = Self::rename_tables(set, &mut previous)?;

        let previous = previous.schema();
        let target = self.state.schema();
        let diffs: BTreeMap<String, SchemaDiff> =
            diff_schemas(previous, target, &set.column_renames())?
                .into_iter()
                .map(|diff| (diff.table_name.clone(), diff))
                .collect();

        for table in best_effort_dag_sort(target) {
            let Some(diff) = diffs.get(&table.name) else {
                continue;
            };
            let generated = match diff.diff_type {
                DiffType::Created => CreateTableGenerator::new(&table.name, target)?.statements(),
                DiffType::Changed if diff.is_additive() => {
                    AddColumnsGenerator::new(&table.name, target, diff.added_columns())?
                        .statements()
                }
                DiffType::Changed => {
                    RecreateTableGenerator::new(&table.name, target, diff)?.statements()
                }
                DiffType::Unchanged | DiffType::Dropped => continue,
            };
            debug!(
                db_version = set.db_version,
                table = %table.name,
                diff = diff.diff_type.as_str(),
                statements = generated.len(),
                "Generated table changes"
            );
            statements.extend(generated);
        }

        for table in best_effort_dag_sort(previous).into_iter().rev() {
            let dropped = diffs
                .get(&table.name)
                .is_some_and(|diff| diff.diff_type == DiffType::Dropped);
            if dropped {
                debug!(db_version = set.db_version, table = %table.name, "Dropping table");
                statements.extend(DropTableGenerator::new(&table.name, previous)?.statements());
            }
        }

        info!(
            db_version = set.db_version,
            statements = statements.len(),
            "Planned migration set"
        );
        Ok(VersionScript {
            db_version: set.db_version,
            statements,
        })
    }

    /// Applies the table renames of `set` to `previous` and returns their SQL.
    ///
    /// A rename runs once nothing still has to move out of its new name. A
    /// table the set drops under a name a rename takes over is dropped first.
    fn rename_tables(set: &MigrationSet, previous: &mut SchemaState) -> Result<Vec<String>> {
        let mut pending: Vec<(String, String)> = set
            .table_renames()
            .into_iter()
            .filter(|(old, _)| previous.schema().contains(old))
            .collect();

        let mut statements = Vec::new();
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|(_, new)| !pending.iter().any(|(old, _)| old == new))
                .ok_or_else(|| {
                    Error::InvalidState(format!(
                        "Table renames in version {} form a cycle",
                        set.db_version
                    ))
                })?;
            let (old, new) = pending.remove(ready);

            if previous.schema().contains(&new) {
                debug!(db_version = set.db_version, table = %new, "Dropping table replaced by a rename");
                statements.extend(DropTableGenerator::new(&new, previous.schema())?.statements());
                previous.apply_migration(&Migration::DropTable { table: new.clone() })?;
            }

            debug!(db_version = set.db_version, from = %old, to = %new, "Renaming table");
            previous.apply_migration(&Migration::RenameTable {
                table: old.clone(),
                new_name: new.clone(),
            })?;
            statements.extend(TableRenameGenerator::new(old, new)?.statements());
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::ColumnSpec;
    use crate::schema::{ForeignKeyAction, QualifiedType};
    use crate::state::replay;

    fn create(version: u32, table: &str) -> MigrationSet {
        MigrationSet::new(version).migration(Migration::create_table(table))
    }

    #[test]
    fn test_first_set_creates_tables() {
        let scripts = MigrationPlanner::plan(&[create(1, "t1")]).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].db_version, 1);
        assert_eq!(scripts[0].statements[0], "DROP TABLE IF EXISTS t1;");
    }

    #[test]
    fn test_add_column_is_additive() {
        let sets = [
            create(1, "t1"),
            MigrationSet::new(2).migration(Migration::add_column(
                "t1",
                "big_decimal_col",
                ColumnSpec::new(QualifiedType::BigDecimal),
            )),
        ];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        assert_eq!(
            scripts[1].statements,
            vec!["ALTER TABLE t1 ADD COLUMN big_decimal_col TEXT;"]
        );
    }

    #[test]
    fn test_rename_column_recreates() {
        let sets = [
            create(1, "t1").migration(Migration::add_column(
                "t1",
                "c1",
                ColumnSpec::new(QualifiedType::String),
            )),
            MigrationSet::new(2).migration(Migration::rename_column("t1", "c1", "c1_renamed")),
        ];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        let insert = scripts[1]
            .statements
            .iter()
            .find(|s| s.starts_with("INSERT INTO"))
            .unwrap();
        assert_eq!(
            insert,
            "INSERT INTO forsuredb_new_t1 SELECT _id, c1, created, deleted, modified FROM t1;"
        );
    }

    #[test]
    fn test_referenced_table_created_first() {
        let set = MigrationSet::new(1)
            .migration(Migration::create_table("t2"))
            .migration(Migration::AddForeignKeyReference {
                table: "t2".into(),
                column: "t1_id".into(),
                spec: ColumnSpec::new(QualifiedType::Long),
                foreign_table: "t1".into(),
                foreign_column: "_id".into(),
                update_action: ForeignKeyAction::Cascade,
                delete_action: ForeignKeyAction::Cascade,
            })
            .migration(Migration::create_table("t1"));
        let scripts = MigrationPlanner::plan(&[set]).unwrap();
        let statements = &scripts[0].statements;
        let pos = |needle: &str| statements.iter().position(|s| s.contains(needle)).unwrap();
        assert!(pos("CREATE TABLE IF NOT EXISTS t1(") < pos("CREATE TABLE IF NOT EXISTS t2("));
    }

    #[test]
    fn test_rename_and_drop_table() {
        let sets = [
            create(1, "t1").migration(Migration::create_table("t2")),
            MigrationSet::new(2)
                .migration(Migration::RenameTable {
                    table: "t1".into(),
                    new_name: "t3".into(),
                })
                .migration(Migration::DropTable { table: "t2".into() }),
        ];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        assert_eq!(
            scripts[1].statements,
            vec![
                "PRAGMA foreign_keys = ON;",
                "ALTER TABLE t1 RENAME TO t3;",
                "DROP TABLE IF EXISTS t2;",
            ]
        );
    }

    #[test]
    fn test_rename_onto_dropped_table() {
        let sets = [
            create(1, "t1")
                .migration(Migration::add_column(
                    "t1",
                    "c1",
                    ColumnSpec::new(QualifiedType::String),
                ))
                .migration(Migration::create_table("t2")),
            MigrationSet::new(2)
                .migration(Migration::DropTable { table: "t2".into() })
                .migration(Migration::RenameTable {
                    table: "t1".into(),
                    new_name: "t2".into(),
                }),
        ];
        let schema = replay(&sets).unwrap();
        assert_eq!(schema.table_names().collect::<Vec<_>>(), vec!["t2"]);

        let scripts = MigrationPlanner::plan(&sets).unwrap();
        assert_eq!(
            scripts[1].statements,
            vec![
                "DROP TABLE IF EXISTS t2;",
                "PRAGMA foreign_keys = ON;",
                "ALTER TABLE t1 RENAME TO t2;",
            ]
        );
    }

    #[test]
    fn test_chained_table_renames_run_in_order() {
        let sets = [
            create(1, "t1").migration(Migration::create_table("t2")),
            MigrationSet::new(2)
                .migration(Migration::RenameTable {
                    table: "t2".into(),
                    new_name: "t3".into(),
                })
                .migration(Migration::RenameTable {
                    table: "t1".into(),
                    new_name: "t2".into(),
                }),
        ];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        let renames: Vec<&String> = scripts[1]
            .statements
            .iter()
            .filter(|s| s.starts_with("ALTER TABLE"))
            .collect();
        assert_eq!(
            renames,
            vec!["ALTER TABLE t2 RENAME TO t3;", "ALTER TABLE t1 RENAME TO t2;"]
        );
    }

    #[test]
    fn test_added_not_null_column_recreates() {
        let sets = [
            create(1, "t1"),
            MigrationSet::new(2).migration(Migration::add_column(
                "t1",
                "a",
                ColumnSpec::new(QualifiedType::Int).not_null(),
            )),
        ];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        let statements = &scripts[1].statements;
        assert_eq!(statements[1], "BEGIN TRANSACTION;");
        assert!(statements[3].contains("a INTEGER NOT NULL"));
        assert!(!statements.iter().any(|s| s.contains("ADD COLUMN")));
    }

    #[test]
    fn test_unchanged_set_is_empty() {
        let sets = [create(1, "t1"), MigrationSet::new(2)];
        let scripts = MigrationPlanner::plan(&sets).unwrap();
        assert!(scripts[1].is_empty());
    }

    #[test]
    fn test_out_of_order_version_fails() {
        let mut planner = MigrationPlanner::new();
        planner.plan_set(&create(2, "t1")).unwrap();
        assert!(matches!(
            planner.plan_set(&create(1, "t2")),
            Err(Error::VersionOrder { previous: 2, next: 1 })
        ));
    }
}
