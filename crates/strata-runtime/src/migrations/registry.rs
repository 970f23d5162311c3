use std::collections::HashMap;
use std::sync::Arc;

use strata_core::error::{Result, StrataError};
use strata_core::migration::Migration;

/// Ordered set of migrations known to the Migrator.
///
/// Registration order is application order. Ids are never sorted; a unit
/// registered later is applied later even if its id compares lower.
/// Removing or reordering units that were already applied is an operator
/// error the registry cannot detect.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    units: Vec<Arc<dyn Migration>>,
    index: HashMap<String, usize>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration. Fails if its id is already registered.
    pub fn register<M: Migration + 'static>(&mut self, migration: M) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    /// Append a shared migration.
    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let id = migration.id().to_string();
        if self.index.contains_key(&id) {
            return Err(StrataError::DuplicateMigration(id));
        }
        self.index.insert(id, self.units.len());
        self.units.push(migration);
        Ok(())
    }

    /// Append every migration in order, stopping at the first duplicate.
    pub fn extend<M, I>(&mut self, migrations: I) -> Result<()>
    where
        M: Migration + 'static,
        I: IntoIterator<Item = M>,
    {
        for migration in migrations {
            self.register(migration)?;
        }
        Ok(())
    }

    /// Look up a migration by id.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Migration>> {
        self.index.get(id).map(|&i| &self.units[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Migrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.units.iter()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|m| m.id())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
