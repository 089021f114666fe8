use crate::error::{Error, Result};
use crate::schema::{ColumnInfo, IndexInfo, Schema, TableInfo};

use super::{index_statement, unique_index_statement, DdlGenerator, DIALECT};

/// Adds columns to an existing table with `ALTER TABLE ... ADD COLUMN`.
///
/// Unique columns get a `CREATE UNIQUE INDEX` right after their column,
/// since SQLite cannot add a UNIQUE column directly. Declared indices that
/// cover one of the new columns follow.
#[derive(Debug, Clone)]
pub struct AddColumnsGenerator {
    table: TableInfo,
    columns: Vec<ColumnInfo>,
}

impl AddColumnsGenerator {
    /// Fails with [`Error::InvalidArgument`] if the table or any requested
    /// column is not defined in `schema`, or if a column is `NOT NULL`
    /// without a default. SQLite cannot add such a column; the table has to be
    /// recreated instead.
    pub fn new<I, S>(table_name: &str, schema: &Schema, column_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = schema.require_table(table_name)?;
        let columns = column_names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                let column = table.get_column(name).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "Column '{name}' is not defined for table '{table_name}'"
                    ))
                })?;
                if !column.nullable && column.default_value.is_none() {
                    return Err(Error::InvalidArgument(format!(
                        "Column '{table_name}.{name}' is NOT NULL without a default and cannot be added"
                    )));
                }
                Ok(column.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table: table.clone(),
            columns,
        })
    }

    fn add_column_statement(&self, column: &ColumnInfo) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table.name,
            column.name,
            DIALECT.type_name(column.qualified_type)
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = DIALECT.render_default(column) {
            sql.push_str(&format!(" DEFAULT({default})"));
        }
        sql.push(';');
        sql
    }

    fn covers_new_column(&self, index: &IndexInfo) -> bool {
        index
            .columns
            .iter()
            .any(|c| self.columns.iter().any(|added| added.name == *c))
    }
}

impl DdlGenerator for AddColumnsGenerator {
    fn statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for column in &self.columns {
            statements.push(self.add_column_statement(column));
            if column.unique {
                statements.push(unique_index_statement(&self.table.name, &column.name));
            }
        }
        statements.extend(
            self.table
                .indices
                .iter()
                .filter(|index| self.covers_new_column(index))
                .map(index_statement),
        );
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::QualifiedType;

    fn schema_with(columns: Vec<ColumnInfo>) -> Schema {
        let mut builder = TableInfo::builder("t1");
        for column in columns {
            builder = builder.column(column);
        }
        Schema::new().table(builder.build().unwrap())
    }

    #[test]
    fn test_add_big_decimal_column() {
        let schema = schema_with(vec![ColumnInfo::new(
            "t1",
            "big_decimal_col",
            QualifiedType::BigDecimal,
        )]);
        let generator = AddColumnsGenerator::new("t1", &schema, ["big_decimal_col"]).unwrap();
        assert_eq!(
            generator.statements(),
            vec!["ALTER TABLE t1 ADD COLUMN big_decimal_col TEXT;"]
        );
    }

    #[test]
    fn test_add_column_with_escaped_default() {
        let schema = schema_with(vec![
            ColumnInfo::new("t1", "string_col", QualifiedType::String).default_value("Hel'lo!"),
        ]);
        let generator = AddColumnsGenerator::new("t1", &schema, ["string_col"]).unwrap();
        assert_eq!(
            generator.statements(),
            vec!["ALTER TABLE t1 ADD COLUMN string_col TEXT DEFAULT('Hel''lo!');"]
        );
    }

    #[test]
    fn test_unique_column_gets_index() {
        let schema = schema_with(vec![
            ColumnInfo::new("t1", "a", QualifiedType::Int).unique(),
            ColumnInfo::new("t1", "b", QualifiedType::Boolean)
                .not_null()
                .default_value("false"),
        ]);
        let generator = AddColumnsGenerator::new("t1", &schema, ["a", "b"]).unwrap();
        assert_eq!(
            generator.statements(),
            vec![
                "ALTER TABLE t1 ADD COLUMN a INTEGER;",
                "CREATE UNIQUE INDEX IF NOT EXISTS t1_unique_a ON t1(a);",
                "ALTER TABLE t1 ADD COLUMN b INTEGER NOT NULL DEFAULT(0);",
            ]
        );
    }

    #[test]
    fn test_declared_index_on_new_column() {
        let table = TableInfo::builder("t1")
            .column(ColumnInfo::new("t1", "a", QualifiedType::Int))
            .column(ColumnInfo::new("t1", "b", QualifiedType::Int))
            .index(IndexInfo::new("t1", vec!["a".to_string()]))
            .index(IndexInfo::new("t1", vec!["b".to_string()]))
            .build()
            .unwrap();
        let schema = Schema::new().table(table);
        let generator = AddColumnsGenerator::new("t1", &schema, ["b"]).unwrap();
        assert_eq!(
            generator.statements(),
            vec![
                "ALTER TABLE t1 ADD COLUMN b INTEGER;",
                "CREATE INDEX IF NOT EXISTS t1_index_b ON t1(b);",
            ]
        );
    }

    #[test]
    fn test_unknown_column_fails() {
        let schema = schema_with(Vec::new());
        let result = AddColumnsGenerator::new("t1", &schema, ["missing"]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_not_null_without_default_fails() {
        let schema = schema_with(vec![ColumnInfo::new("t1", "a", QualifiedType::Int).not_null()]);
        let result = AddColumnsGenerator::new("t1", &schema, ["a"]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_table_fails() {
        let result = AddColumnsGenerator::new("t9", &Schema::new(), ["a"]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
