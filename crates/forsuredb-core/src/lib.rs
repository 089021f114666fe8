//! Schema model and SQL generation for forsuredb.
//!
//! `forsuredb-core` turns a versioned list of migrations into the SQLite DDL
//! that brings a database from one version to the next:
//!
//! - **Schema** - Tables, columns, foreign keys and indices
//! - **Migration** - Versioned schema changes and their JSON manifest form
//! - **State** - Replays migrations into the schema expected at a version
//! - **Diff** - Structural differences between two versions of a table
//! - **Sort** - Orders tables so referenced tables come first
//! - **Generator** - Renders SQL for a create, add-columns, recreate, rename or drop
//! - **Planner** - Chooses generators for each migration set
//!
//! # Example
//!
//! ```rust
//! use forsuredb_core::prelude::*;
//!
//! let sets = vec![
//!     MigrationSet::new(1).migration(Migration::create_table("users")),
//!     MigrationSet::new(2).migration(Migration::add_column(
//!         "users",
//!         "email",
//!         ColumnSpec::new(QualifiedType::String),
//!     )),
//! ];
//!
//! let scripts = MigrationPlanner::plan(&sets).unwrap();
//! assert_eq!(
//!     scripts[1].statements,
//!     vec!["ALTER TABLE users ADD COLUMN email TEXT;"]
//! );
//! ```

pub mod dialect;
pub mod diff;
pub mod error;
pub mod generator;
pub mod migration;
pub mod planner;
pub mod schema;
pub mod sort;
pub mod state;

pub use error::{Error, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dialect::SqliteDialect;
    pub use crate::diff::{diff_schemas, diff_table, ColumnRenames, DiffType, SchemaDiff, TableChange};
    pub use crate::error::{Error, Result};
    pub use crate::generator::{
        AddColumnsGenerator, CreateTableGenerator, DdlGenerator, DropTableGenerator,
        RecreateTableGenerator, TableRenameGenerator,
    };
    pub use crate::migration::{
        load_manifest, parse_manifest, to_manifest, ColumnSpec, Migration, MigrationSet,
    };
    pub use crate::planner::{MigrationPlanner, VersionScript};
    pub use crate::schema::{
        ColumnInfo, ConflictResolution, ForeignKeyAction, ForeignKeyInfo, IndexInfo,
        QualifiedType, Schema, SortOrder, TableInfo,
    };
    pub use crate::sort::best_effort_dag_sort;
    pub use crate::state::{replay, SchemaState};
}
