//! Applies forsuredb migration manifests to SQLite databases.
//!
//! `forsuredb-migrate` runs the SQL planned by `forsuredb-core` against a
//! live database:
//!
//! - **History** - Tracks applied database versions in `forsuredb_migrations`
//! - **Executor** - Applies pending versions, one connection per version
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply pending versions
//! forsuredb-migrate --manifest migrations.json migrate
//!
//! # Print the SQL for version 3
//! forsuredb-migrate sql --version 3
//!
//! # Show applied versions
//! forsuredb-migrate show
//!
//! # Print the schema as of version 2
//! forsuredb-migrate schema --version 2
//! ```

pub mod error;
pub mod executor;
pub mod history;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::MigrationExecutor;
    pub use crate::history::{AppliedVersion, MigrationHistory};
}
