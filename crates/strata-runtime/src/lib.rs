pub mod db;
pub mod migrations;

pub use db::Database;
pub use migrations::{
    builtin_registry, load_migrations_from_dir, MigrationRegistry, MigrationStatus, Migrator,
    PgMigrationStore, SqlMigration,
};
