//! Strata - transactional schema migrations for PostgreSQL.
//!
//! Register migrations in order, then let a [`Migrator`] bring the database
//! up to date or roll back the most recent units. Each unit commits together
//! with its bookkeeping row, so a failed run never leaves a half-applied
//! migration behind.
//!
//! ```ignore
//! let db = Database::from_config(&config.database).await?;
//! let store = PgMigrationStore::new(db.pool().clone());
//! let migrator = Migrator::new(Arc::new(store), builtin_registry()?);
//! migrator.migrate().await?;
//! ```

#[doc(hidden)]
pub use strata_core;

pub use strata_core::config::StrataConfig;
pub use strata_core::error::{Result, StrataError};
pub use strata_core::migration::{Migration, MigrationStore, SchemaTransaction};
pub use strata_runtime::migrations::{
    builtin_migrations, builtin_registry, load_migrations_from_dir, AppliedMigration,
    MigrationRegistry, MigrationStatus, Migrator, PgMigrationStore, SqlMigration,
};
pub use strata_runtime::Database;
