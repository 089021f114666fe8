use crate::error::Result;
use crate::schema::{Schema, TableInfo};

use super::{create_table_statement, index_statement, DdlGenerator, DIALECT};

/// Creates a table from scratch, dropping any previous table of that name.
///
/// When the table has foreign keys the statements are bracketed by
/// `PRAGMA foreign_keys = false;` / `PRAGMA foreign_keys = true;`.
#[derive(Debug, Clone)]
pub struct CreateTableGenerator {
    table: TableInfo,
}

impl CreateTableGenerator {
    /// Fails with [`crate::Error::InvalidArgument`] if `table_name` is not in `schema`.
    pub fn new(table_name: &str, schema: &Schema) -> Result<Self> {
        Ok(Self {
            table: schema.require_table(table_name)?.clone(),
        })
    }
}

impl DdlGenerator for CreateTableGenerator {
    fn statements(&self) -> Vec<String> {
        let table = &self.table;
        let has_foreign_keys = !table.foreign_keys.is_empty();

        let mut statements = Vec::new();
        if has_foreign_keys {
            statements.push(DIALECT.foreign_keys_switch(false));
        }
        statements.push(format!("DROP TABLE IF EXISTS {};", table.name));
        statements.push(create_table_statement(table, &table.name));
        statements.extend(table.indices.iter().map(index_statement));
        statements.push(DIALECT.modified_trigger(&table.name));
        if has_foreign_keys {
            statements.push(DIALECT.foreign_keys_switch(true));
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::CURRENT_UTC_TIME;
    use crate::schema::{ColumnInfo, ForeignKeyAction, ForeignKeyInfo, IndexInfo, QualifiedType};
    use crate::Error;

    fn statements(table: TableInfo) -> Vec<String> {
        let name = table.name.clone();
        let schema = Schema::new().table(table);
        CreateTableGenerator::new(&name, &schema).unwrap().statements()
    }

    #[test]
    fn test_system_columns_only() {
        let sql = statements(TableInfo::new("t1"));
        assert_eq!(
            sql,
            vec![
                "DROP TABLE IF EXISTS t1;".to_string(),
                format!(
                    "CREATE TABLE IF NOT EXISTS t1(_id INTEGER PRIMARY KEY, created DATETIME DEFAULT({CURRENT_UTC_TIME}), deleted INTEGER DEFAULT(0), modified DATETIME DEFAULT({CURRENT_UTC_TIME}));"
                ),
                format!(
                    "CREATE TRIGGER IF NOT EXISTS t1_modified_trigger AFTER UPDATE ON t1 BEGIN UPDATE t1 SET modified={CURRENT_UTC_TIME} WHERE _id=NEW._id; END;"
                ),
            ]
        );
    }

    #[test]
    fn test_string_default_is_escaped() {
        let table = TableInfo::builder("t1")
            .column(ColumnInfo::new("t1", "string_col", QualifiedType::String).default_value("Hel'lo!"))
            .build()
            .unwrap();
        let sql = statements(table);
        assert!(sql[1].contains("string_col TEXT DEFAULT('Hel''lo!')"));
    }

    #[test]
    fn test_columns_sorted_alphabetically() {
        let table = TableInfo::builder("t1")
            .column(ColumnInfo::new("t1", "zeta", QualifiedType::Int))
            .column(ColumnInfo::new("t1", "alpha", QualifiedType::Int))
            .build()
            .unwrap();
        let sql = statements(table);
        let alpha = sql[1].find("alpha INTEGER").unwrap();
        let zeta = sql[1].find("zeta INTEGER").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_composite_foreign_key_is_one_clause() {
        let table = TableInfo::builder("t2")
            .column(ColumnInfo::new("t2", "c1", QualifiedType::Long))
            .column(ColumnInfo::new("t2", "c2", QualifiedType::Long))
            .foreign_key(
                ForeignKeyInfo::new("t2", "t1")
                    .column_pair("c1", "c1")
                    .on_update(ForeignKeyAction::Cascade)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKeyInfo::new("t2", "t1")
                    .column_pair("c2", "c2")
                    .on_update(ForeignKeyAction::Cascade)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .build()
            .unwrap();

        let sql = statements(table);
        assert_eq!(sql.first().map(String::as_str), Some("PRAGMA foreign_keys = false;"));
        assert_eq!(sql.last().map(String::as_str), Some("PRAGMA foreign_keys = true;"));
        assert!(sql[2].contains(
            "FOREIGN KEY(c1, c2) REFERENCES t1(c1, c2) ON DELETE CASCADE ON UPDATE CASCADE"
        ));
        assert_eq!(sql[2].matches("FOREIGN KEY").count(), 1);
    }

    #[test]
    fn test_indices_precede_trigger() {
        let table = TableInfo::builder("t1")
            .column(ColumnInfo::new("t1", "a", QualifiedType::Int))
            .index(IndexInfo::new("t1", vec!["a".to_string()]))
            .build()
            .unwrap();
        let sql = statements(table);
        assert_eq!(sql[2], "CREATE INDEX IF NOT EXISTS t1_index_a ON t1(a);");
        assert!(sql[3].starts_with("CREATE TRIGGER"));
    }

    #[test]
    fn test_unknown_table() {
        let result = CreateTableGenerator::new("missing", &Schema::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
