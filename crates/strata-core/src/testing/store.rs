//! In-memory migration store.
//!
//! Keeps a catalog of table names plus the record table, and understands the
//! small slice of DDL that schema migrations are made of: `CREATE TABLE`,
//! `DROP TABLE`, `ALTER TABLE`, `CREATE [UNIQUE] INDEX ... ON`, `DROP INDEX`
//! and the DML verbs against existing tables. `REFERENCES other` requires
//! `other` to exist, which is enough to observe ordering mistakes.
//!
//! Transactions work on a copy of the catalog and swap it in on commit.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{Result, StrataError};
use crate::migration::{
    BoxFuture, MigrationRecord, MigrationStore, RecordOrder, SchemaTransaction,
};

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: BTreeSet<String>,
    record_table: bool,
    records: Vec<MigrationRecord>,
    next_seq: i64,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    fail_commit: bool,
    fail_insert: HashSet<String>,
    fail_delete: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    catalog: Catalog,
    faults: Faults,
    clock: Option<DateTime<Utc>>,
    commits: usize,
}

/// In-memory [`MigrationStore`] for tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail as if the database were down.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().await.faults.unreachable = unreachable;
    }

    /// Make every commit fail.
    pub async fn fail_commits(&self, fail: bool) {
        self.inner.lock().await.faults.fail_commit = fail;
    }

    /// Make inserting the record for `id` fail.
    pub async fn fail_record_insert(&self, id: &str) {
        self.inner.lock().await.faults.fail_insert.insert(id.to_string());
    }

    /// Make deleting the record for `id` fail.
    pub async fn fail_record_delete(&self, id: &str) {
        self.inner.lock().await.faults.fail_delete.insert(id.to_string());
    }

    /// Stamp every new record with `at` instead of the current time.
    pub async fn freeze_clock(&self, at: DateTime<Utc>) {
        self.inner.lock().await.clock = Some(at);
    }

    pub async fn has_table(&self, name: &str) -> bool {
        self.inner
            .lock()
            .await
            .catalog
            .tables
            .contains(&name.to_ascii_lowercase())
    }

    /// Committed tables, sorted by name.
    pub async fn tables(&self) -> Vec<String> {
        self.inner.lock().await.catalog.tables.iter().cloned().collect()
    }

    /// Committed record ids in application order.
    pub async fn record_ids(&self) -> Vec<String> {
        let mut records = self.inner.lock().await.catalog.records.clone();
        RecordOrder::Applied.sort(&mut records);
        records.into_iter().map(|r| r.id).collect()
    }

    /// Number of successful commits so far.
    pub async fn commits(&self) -> usize {
        self.inner.lock().await.commits
    }

    async fn check_reachable(&self) -> Result<()> {
        if self.inner.lock().await.faults.unreachable {
            return Err(StrataError::Connection("memory store is unreachable".into()));
        }
        Ok(())
    }

    async fn committed_records(&self) -> Result<Vec<MigrationRecord>> {
        self.check_reachable().await?;
        let inner = self.inner.lock().await;
        if !inner.catalog.record_table {
            return Err(StrataError::Database(
                "record table does not exist".into(),
            ));
        }
        Ok(inner.catalog.records.clone())
    }
}

impl MigrationStore for MemoryStore {
    fn ensure_table(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_reachable().await?;
            self.inner.lock().await.catalog.record_table = true;
            Ok(())
        })
    }

    fn list_applied(&self, order: RecordOrder) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let mut records = self.committed_records().await?;
            order.sort(&mut records);
            Ok(records)
        })
    }

    fn latest_applied(&self, limit: usize) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let mut records = self.committed_records().await?;
            RecordOrder::LatestFirst.sort(&mut records);
            records.truncate(limit);
            Ok(records)
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn SchemaTransaction>>> {
        Box::pin(async move {
            self.check_reachable().await?;
            let staged = self.inner.lock().await.catalog.clone();
            let tx: Box<dyn SchemaTransaction> = Box::new(MemoryTransaction {
                inner: Arc::clone(&self.inner),
                staged,
            });
            Ok(tx)
        })
    }
}

struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    staged: Catalog,
}

impl SchemaTransaction for MemoryTransaction {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { apply_statement(&mut self.staged, statement) })
    }

    fn insert_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (fail, clock) = {
                let inner = self.inner.lock().await;
                (inner.faults.fail_insert.contains(id), inner.clock)
            };
            if fail {
                return Err(StrataError::Database(format!(
                    "injected insert failure for '{}'",
                    id
                )));
            }
            if !self.staged.record_table {
                return Err(StrataError::Database("record table does not exist".into()));
            }
            if self.staged.records.iter().any(|r| r.id == id) {
                return Err(StrataError::Database(format!(
                    "duplicate key value violates primary key: '{}'",
                    id
                )));
            }

            self.staged.next_seq += 1;
            self.staged.records.push(MigrationRecord {
                id: id.to_string(),
                applied_at: clock.unwrap_or_else(Utc::now),
                seq: self.staged.next_seq,
            });
            Ok(())
        })
    }

    fn delete_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.inner.lock().await.faults.fail_delete.contains(id) {
                return Err(StrataError::Database(format!(
                    "injected delete failure for '{}'",
                    id
                )));
            }
            let before = self.staged.records.len();
            self.staged.records.retain(|r| r.id != id);
            if self.staged.records.len() == before {
                return Err(StrataError::Database(format!("no record for '{}'", id)));
            }
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let MemoryTransaction { inner, staged } = *self;
        Box::pin(async move {
            let mut inner = inner.lock().await;
            if inner.faults.fail_commit {
                return Err(StrataError::Database("injected commit failure".into()));
            }
            inner.catalog = staged;
            inner.commits += 1;
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

fn apply_statement(catalog: &mut Catalog, statement: &str) -> Result<()> {
    let tokens: Vec<String> = statement
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';'))
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('"').to_ascii_lowercase())
        .collect();
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["create", "table", "if", "not", "exists", name, rest @ ..] => {
            check_references(catalog, name, rest)?;
            catalog.tables.insert(name.to_string());
            Ok(())
        }
        ["create", "table", name, rest @ ..] => {
            if catalog.tables.contains(*name) {
                return Err(StrataError::Statement(format!(
                    "relation \"{}\" already exists",
                    name
                )));
            }
            check_references(catalog, name, rest)?;
            catalog.tables.insert(name.to_string());
            Ok(())
        }
        ["drop", "table", "if", "exists", name, ..] => {
            catalog.tables.remove(*name);
            Ok(())
        }
        ["drop", "table", name, ..] => {
            if catalog.tables.remove(*name) {
                Ok(())
            } else {
                Err(missing(name))
            }
        }
        ["alter", "table", name, rest @ ..] => {
            require(catalog, name)?;
            check_references(catalog, name, rest)
        }
        ["create", "index", rest @ ..] | ["create", "unique", "index", rest @ ..] => {
            match rest.iter().position(|w| *w == "on") {
                Some(i) if i + 1 < rest.len() => require(catalog, rest[i + 1]),
                _ => Err(unsupported(statement)),
            }
        }
        ["drop", "index", ..] => Ok(()),
        ["insert", "into", name, ..] | ["update", name, ..] | ["delete", "from", name, ..] => {
            require(catalog, name)
        }
        _ => Err(unsupported(statement)),
    }
}

fn check_references(catalog: &Catalog, table: &str, words: &[&str]) -> Result<()> {
    for pair in words.windows(2) {
        if pair[0] == "references" && pair[1] != table {
            require(catalog, pair[1])?;
        }
    }
    Ok(())
}

fn require(catalog: &Catalog, name: &str) -> Result<()> {
    if catalog.tables.contains(name) {
        Ok(())
    } else {
        Err(missing(name))
    }
}

fn missing(name: &str) -> StrataError {
    StrataError::Statement(format!("relation \"{}\" does not exist", name))
}

fn unsupported(statement: &str) -> StrataError {
    StrataError::Statement(format!("unsupported statement: {}", statement.trim()))
}
