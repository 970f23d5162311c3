use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

use super::record::{MigrationRecord, RecordOrder};

/// Boxed future returned by the store and migration traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A schema change with an id, a forward body and a backward body.
///
/// Both bodies receive the transaction the Migrator opened for this unit and
/// must not commit or roll it back themselves.
pub trait Migration: Send + Sync {
    /// Unique id, e.g. `003_create_files_table`.
    fn id(&self) -> &str;

    /// Apply the change.
    fn forward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>>;

    /// Undo the change made by [`Migration::forward`].
    fn backward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>>;

    /// Whether `backward` can succeed at all.
    fn is_reversible(&self) -> bool {
        true
    }
}

/// An open transaction against the store.
///
/// Record inserts and deletes go through the same handle as the schema
/// statements so they commit or vanish together.
pub trait SchemaTransaction: Send {
    /// Execute one schema statement.
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Insert the record row for `id`.
    fn insert_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Delete the record row for `id`.
    fn delete_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Durable storage of migration records plus the ability to open transactions.
pub trait MigrationStore: Send + Sync {
    /// Create the record table if it does not exist. Safe to call on every start.
    fn ensure_table(&self) -> BoxFuture<'_, Result<()>>;

    /// All records in the requested order.
    fn list_applied(&self, order: RecordOrder) -> BoxFuture<'_, Result<Vec<MigrationRecord>>>;

    /// The `limit` most recently applied records, newest first.
    fn latest_applied(&self, limit: usize) -> BoxFuture<'_, Result<Vec<MigrationRecord>>>;

    /// Open a new transaction.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn SchemaTransaction>>>;
}
