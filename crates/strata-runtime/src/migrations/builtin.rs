//! Built-in application schema migrations.
//!
//! These create the tables of the file storage service: users, folders,
//! files and shares. Each embeds its SQL from the `migrations` directory and
//! is registered before any migrations loaded from disk.

use strata_core::error::Result;

use super::registry::MigrationRegistry;
use super::sql::SqlMigration;

const BUILTIN_SQL: &[(&str, &str)] = &[
    (
        "001_create_users_table",
        include_str!("../../migrations/001_create_users_table.sql"),
    ),
    (
        "002_create_folders_table",
        include_str!("../../migrations/002_create_folders_table.sql"),
    ),
    (
        "003_create_files_table",
        include_str!("../../migrations/003_create_files_table.sql"),
    ),
    (
        "004_create_shares_table",
        include_str!("../../migrations/004_create_shares_table.sql"),
    ),
];

/// Get all built-in migrations in application order.
pub fn builtin_migrations() -> Vec<SqlMigration> {
    BUILTIN_SQL
        .iter()
        .map(|(id, sql)| SqlMigration::parse(*id, sql))
        .collect()
}

/// A registry holding the built-in migrations.
pub fn builtin_registry() -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    registry.extend(builtin_migrations())?;
    Ok(registry)
}
