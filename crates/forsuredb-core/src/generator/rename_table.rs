use crate::error::{Error, Result};

use super::{DdlGenerator, DIALECT};

/// Renames a table.
///
/// Foreign-key enforcement is switched on first so SQLite rewrites the
/// references held by other tables.
#[derive(Debug, Clone)]
pub struct TableRenameGenerator {
    old_name: String,
    new_name: String,
}

impl TableRenameGenerator {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Result<Self> {
        let old_name = old_name.into();
        let new_name = new_name.into();
        if old_name.is_empty() || new_name.is_empty() {
            return Err(Error::InvalidArgument(
                "Table names must not be empty".to_string(),
            ));
        }
        if old_name == new_name {
            return Err(Error::InvalidArgument(format!(
                "Cannot rename table '{old_name}' to itself"
            )));
        }
        Ok(Self { old_name, new_name })
    }
}

impl DdlGenerator for TableRenameGenerator {
    fn statements(&self) -> Vec<String> {
        vec![
            DIALECT.foreign_keys_pragma(true),
            format!("ALTER TABLE {} RENAME TO {};", self.old_name, self.new_name),
        ]
    }
}
