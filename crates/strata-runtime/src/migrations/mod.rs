mod builtin;
mod migrator;
mod postgres;
mod registry;
mod sql;

pub use builtin::{builtin_migrations, builtin_registry};
pub use migrator::{AppliedMigration, MigrationStatus, Migrator};
pub use postgres::{PgMigrationStore, DEFAULT_RECORD_TABLE};
pub use registry::MigrationRegistry;
pub use sql::{load_migrations_from_dir, split_sql_statements, SqlMigration};
