use crate::diff::{ColumnRenames, DiffType, SchemaDiff};
use crate::dialect::NEW_TABLE_PREFIX;
use crate::error::{Error, Result};
use crate::schema::{Schema, TableInfo};

use super::{create_table_statement, index_statement, DdlGenerator, DIALECT};

/// Rebuilds a table into its target shape, carrying rows across.
///
/// SQLite cannot alter constraints in place, so the table is copied into a
/// freshly created `forsuredb_new_<table>`, the old table is dropped and the
/// copy renamed. Foreign-key enforcement is off for the duration.
#[derive(Debug, Clone)]
pub struct RecreateTableGenerator {
    table: TableInfo,
    renames: ColumnRenames,
    added: Vec<String>,
}

impl RecreateTableGenerator {
    /// `schema` is the target schema and `diff` the change that brought the
    /// table there.
    pub fn new(table_name: &str, schema: &Schema, diff: &SchemaDiff) -> Result<Self> {
        let table = schema.require_table(table_name)?;
        if diff.table_name != table_name {
            return Err(Error::InvalidArgument(format!(
                "Diff for table '{}' cannot recreate table '{table_name}'",
                diff.table_name
            )));
        }
        if matches!(diff.diff_type, DiffType::Created | DiffType::Dropped) {
            return Err(Error::InvalidArgument(format!(
                "Cannot recreate table '{table_name}' from a {} diff",
                diff.diff_type.as_str()
            )));
        }

        let renames = diff.column_renames();
        if let Some(new_name) = renames.values().find(|new| !table.has_column(new)) {
            return Err(Error::InvalidArgument(format!(
                "Renamed column '{new_name}' is not defined for table '{table_name}'"
            )));
        }

        Ok(Self {
            table: table.clone(),
            renames,
            added: diff.added_columns().into_iter().collect(),
        })
    }

    fn temp_name(&self) -> String {
        format!("{NEW_TABLE_PREFIX}{}", self.table.name)
    }

    /// Source expression for each target column, in column order.
    fn select_list(&self) -> Vec<String> {
        self.table
            .column_names()
            .map(|column| {
                // A renamed column whose type changed counts as added.
                if self.added.iter().any(|a| a == column) {
                    "NULL".to_string()
                } else if let Some((old, _)) = self.renames.iter().find(|(_, new)| *new == column) {
                    old.clone()
                } else {
                    column.to_string()
                }
            })
            .collect()
    }
}

impl DdlGenerator for RecreateTableGenerator {
    fn statements(&self) -> Vec<String> {
        let name = &self.table.name;
        let temp = self.temp_name();

        let mut statements = vec![
            DIALECT.foreign_keys_pragma(false),
            "BEGIN TRANSACTION;".to_string(),
            format!("DROP TABLE IF EXISTS {temp};"),
            create_table_statement(&self.table, &temp),
            format!(
                "INSERT INTO {temp} SELECT {} FROM {name};",
                self.select_list().join(", ")
            ),
            format!("DROP TABLE {name};"),
            format!("ALTER TABLE {temp} RENAME TO {name};"),
        ];
        statements.extend(self.table.indices.iter().map(index_statement));
        statements.push(DIALECT.modified_trigger(name));
        statements.push("END TRANSACTION;".to_string());
        statements.push(DIALECT.foreign_keys_pragma(true));
        statements
    }
}
