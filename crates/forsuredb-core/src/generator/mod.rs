//! DDL generators.
//!
//! Each generator validates its arguments when constructed and renders an
//! ordered list of semicolon-terminated SQLite statements. The list is meant
//! to be executed in order, on one connection, as a single unit of work.

mod add_columns;
mod create_table;
mod drop_table;
mod recreate_table;
mod rename_table;

pub use add_columns::AddColumnsGenerator;
pub use create_table::CreateTableGenerator;
pub use drop_table::DropTableGenerator;
pub use recreate_table::RecreateTableGenerator;
pub use rename_table::TableRenameGenerator;

use crate::dialect::SqliteDialect;
use crate::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, SortOrder, TableInfo, ID_COLUMN};

const DIALECT: SqliteDialect = SqliteDialect::new();

/// Produces the SQL statements for one schema change.
pub trait DdlGenerator {
    /// Statements to execute, in order.
    fn statements(&self) -> Vec<String>;
}

/// Column definition as used inside `CREATE TABLE`.
fn column_definition(table: &TableInfo, column: &ColumnInfo) -> String {
    let mut sql = format!(
        "{} {}",
        column.name,
        DIALECT.type_name(column.qualified_type)
    );
    let inline_primary_key = table.has_default_primary_key() && column.name == ID_COLUMN;
    if inline_primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if !column.nullable && !inline_primary_key {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !inline_primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = DIALECT.render_default(column) {
        sql.push_str(&format!(" DEFAULT({default})"));
    }
    sql
}

fn foreign_key_clause(fk: &ForeignKeyInfo) -> String {
    let mut sql = format!(
        "FOREIGN KEY({}) REFERENCES {}({})",
        fk.local_columns().collect::<Vec<_>>().join(", "),
        fk.foreign_table_name,
        fk.foreign_columns().collect::<Vec<_>>().join(", ")
    );
    if fk.delete_action != crate::schema::ForeignKeyAction::NoAction {
        sql.push_str(&format!(" ON DELETE {}", fk.delete_action));
    }
    if fk.update_action != crate::schema::ForeignKeyAction::NoAction {
        sql.push_str(&format!(" ON UPDATE {}", fk.update_action));
    }
    sql
}

/// `CREATE TABLE IF NOT EXISTS <name>(...)` for `table`, created under `name`.
fn create_table_statement(table: &TableInfo, name: &str) -> String {
    let mut definitions: Vec<String> = table
        .columns
        .values()
        .map(|column| column_definition(table, column))
        .collect();

    if !table.has_default_primary_key() {
        let mut primary_key = format!(
            "PRIMARY KEY({})",
            table.primary_key.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        if let Some(resolution) = table.primary_key_on_conflict {
            primary_key.push_str(&format!(" ON CONFLICT {}", resolution.to_sql()));
        }
        definitions.push(primary_key);
    }
    definitions.extend(table.foreign_keys.values().map(foreign_key_clause));

    format!("CREATE TABLE IF NOT EXISTS {name}({});", definitions.join(", "))
}

fn index_statement(index: &IndexInfo) -> String {
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| match index.order {
            SortOrder::Asc => c.clone(),
            SortOrder::Desc => format!("{c} DESC"),
        })
        .collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {}({});",
        if index.unique { "UNIQUE " } else { "" },
        index.name(),
        index.table_name,
        columns.join(", ")
    )
}

fn unique_index_statement(table: &str, column: &str) -> String {
    index_statement(&IndexInfo::new(table, vec![column.to_string()]).unique())
}
