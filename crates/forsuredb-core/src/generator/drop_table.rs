use crate::error::Result;
use crate::schema::Schema;

use super::DdlGenerator;

/// Drops a table that exists in the previous schema.
#[derive(Debug, Clone)]
pub struct DropTableGenerator {
    table_name: String,
}

impl DropTableGenerator {
    /// `schema` is the schema the table is dropped from.
    pub fn new(table_name: &str, schema: &Schema) -> Result<Self> {
        schema.require_table(table_name)?;
        Ok(Self {
            table_name: table_name.to_string(),
        })
    }
}

impl DdlGenerator for DropTableGenerator {
    fn statements(&self) -> Vec<String> {
        vec![format!("DROP TABLE IF EXISTS {};", self.table_name)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableInfo;

    #[test]
    fn test_drop() {
        let schema = Schema::new().table(TableInfo::new("t1"));
        let generator = DropTableGenerator::new("t1", &schema).unwrap();
        assert_eq!(generator.statements(), vec!["DROP TABLE IF EXISTS t1;"]);
        assert!(DropTableGenerator::new("t2", &schema).is_err());
    }
}
