//! Applies and rolls back registered migrations against a store.
//!
//! Every unit runs in its own transaction together with the insert or delete
//! of its record row, so the record table always matches the committed
//! schema. Both directions stop at the first failing unit; units committed
//! before it stay committed.
//!
//! Runs are not coordinated across processes. Two concurrent `migrate()`
//! calls against one database are undefined.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_core::error::{Result, StrataError};
use strata_core::migration::{Migration, MigrationStore, RecordOrder, SchemaTransaction};
use tracing::{debug, info, warn};

use super::registry::MigrationRegistry;

/// Orchestrates migration runs for one registry and one store.
pub struct Migrator {
    store: Arc<dyn MigrationStore>,
    registry: MigrationRegistry,
}

impl Migrator {
    pub fn new(store: Arc<dyn MigrationStore>, registry: MigrationRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Apply every registered migration that has no record yet, in
    /// registration order. Returns the ids applied by this call.
    pub async fn migrate(&self) -> Result<Vec<String>> {
        self.store.ensure_table().await?;

        let applied: HashSet<String> = self
            .store
            .list_applied(RecordOrder::Applied)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in self.registry.iter() {
            if applied.contains(migration.id()) {
                continue;
            }
            self.apply(migration.as_ref()).await?;
            newly_applied.push(migration.id().to_string());
        }

        if newly_applied.is_empty() {
            info!("Schema is up to date");
        } else {
            info!("Applied {} migration(s)", newly_applied.len());
        }
        Ok(newly_applied)
    }

    /// Undo the `count` most recently applied migrations, newest first.
    ///
    /// Records whose migration is no longer registered are skipped with a
    /// warning and left in place; they still count towards `count`.
    /// Returns the ids rolled back.
    pub async fn rollback(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Err(StrataError::InvalidArgument(
                "rollback count must be at least 1".into(),
            ));
        }

        self.store.ensure_table().await?;
        let targets = self.store.latest_applied(count).await?;

        let mut rolled_back = Vec::new();
        for record in targets {
            let Some(migration) = self.registry.get(&record.id) else {
                warn!(
                    migration_id = %record.id,
                    "Migration not found in registry, skipping rollback"
                );
                continue;
            };
            self.revert(migration.as_ref()).await?;
            rolled_back.push(record.id);
        }

        Ok(rolled_back)
    }

    /// Compare the registry with the record table.
    pub async fn status(&self) -> Result<MigrationStatus> {
        self.store.ensure_table().await?;
        let records = self.store.list_applied(RecordOrder::Applied).await?;

        let applied_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let pending = self
            .registry
            .ids()
            .filter(|id| !applied_ids.contains(id))
            .map(str::to_string)
            .collect();

        let applied = records
            .iter()
            .map(|r| {
                let migration = self.registry.get(&r.id);
                AppliedMigration {
                    id: r.id.clone(),
                    applied_at: r.applied_at,
                    known: migration.is_some(),
                    reversible: migration.is_some_and(|m| m.is_reversible()),
                }
            })
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    async fn apply(&self, migration: &dyn Migration) -> Result<()> {
        let id = migration.id();
        info!(migration_id = id, "Applying migration");

        let mut tx = self.store.begin().await?;
        let forward = migration.forward(&mut *tx).await;
        let outcome = match forward {
            Ok(()) => tx
                .insert_record(id)
                .await
                .map_err(|e| StrataError::bookkeeping(id, e)),
            Err(e) => Err(StrataError::migration(id, e)),
        };
        finish(tx, id, outcome).await?;

        info!(migration_id = id, "Migration applied");
        Ok(())
    }

    async fn revert(&self, migration: &dyn Migration) -> Result<()> {
        let id = migration.id();
        info!(migration_id = id, "Rolling back migration");

        let mut tx = self.store.begin().await?;
        let backward = migration.backward(&mut *tx).await;
        let outcome = match backward {
            Ok(()) => tx
                .delete_record(id)
                .await
                .map_err(|e| StrataError::bookkeeping(id, e)),
            Err(e) => Err(StrataError::rollback(id, e)),
        };
        finish(tx, id, outcome).await?;

        info!(migration_id = id, "Migration rolled back");
        Ok(())
    }
}

/// Commit on success, roll back and return the original error otherwise.
async fn finish(tx: Box<dyn SchemaTransaction>, id: &str, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => tx.commit().await.map_err(|e| StrataError::commit(id, e)),
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    migration_id = id,
                    error = %rollback_err,
                    "Failed to roll back transaction"
                );
            }
            Err(e)
        }
    }
}

/// Snapshot of applied and pending migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Records in application order.
    pub applied: Vec<AppliedMigration>,
    /// Registered ids without a record, in registration order.
    pub pending: Vec<String>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records whose migration is no longer registered.
    pub fn orphaned(&self) -> impl Iterator<Item = &AppliedMigration> {
        self.applied.iter().filter(|m| !m.known)
    }
}

/// One row of the record table, joined with the registry.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: String,
    pub applied_at: DateTime<Utc>,
    /// The registry still holds this migration.
    pub known: bool,
    /// The migration has a backward body.
    pub reversible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::SqlMigration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_core::migration::BoxFuture;
    use strata_core::testing::MemoryStore;

    fn users() -> SqlMigration {
        SqlMigration::new(
            "001_create_users_table",
            "CREATE TABLE users (id BIGSERIAL PRIMARY KEY, email TEXT NOT NULL);",
        )
        .with_down("DROP TABLE users;")
    }

    fn folders() -> SqlMigration {
        SqlMigration::new(
            "002_create_folders_table",
            "CREATE TABLE folders (id BIGSERIAL PRIMARY KEY, user_id BIGINT NOT NULL REFERENCES users(id));",
        )
        .with_down("DROP TABLE folders;")
    }

    fn files() -> SqlMigration {
        SqlMigration::new(
            "003_create_files_table",
            "CREATE TABLE files (id BIGSERIAL PRIMARY KEY, folder_id BIGINT REFERENCES folders(id));",
        )
        .with_down("DROP TABLE files;")
    }

    fn table(id: &str, name: &str) -> SqlMigration {
        SqlMigration::new(id, format!("CREATE TABLE {} (id INT);", name))
            .with_down(format!("DROP TABLE {};", name))
    }

    fn registry(migrations: Vec<SqlMigration>) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        registry.extend(migrations).unwrap();
        registry
    }

    fn migrator_for(store: &MemoryStore, migrations: Vec<SqlMigration>) -> Migrator {
        Migrator::new(Arc::new(store.clone()), registry(migrations))
    }

    /// Log output collected by a thread-local subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Counts how often each body runs.
    struct Counting {
        forward: AtomicUsize,
        backward: AtomicUsize,
    }

    impl Migration for Counting {
        fn id(&self) -> &str {
            "001_counting"
        }

        fn forward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.forward.fetch_add(1, Ordering::SeqCst);
                tx.execute("CREATE TABLE counting (id INT)").await
            })
        }

        fn backward<'a>(&'a self, tx: &'a mut dyn SchemaTransaction) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.backward.fetch_add(1, Ordering::SeqCst);
                tx.execute("DROP TABLE counting").await
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_store_then_rollback_one() {
        let store = MemoryStore::new();
        let migrator = migrator_for(&store, vec![users(), folders()]);

        let applied = migrator.migrate().await.unwrap();
        assert_eq!(
            applied,
            vec!["001_create_users_table", "002_create_folders_table"]
        );
        assert_eq!(
            store.record_ids().await,
            vec!["001_create_users_table", "002_create_folders_table"]
        );
        assert!(store.has_table("users").await);
        assert!(store.has_table("folders").await);

        let rolled_back = migrator.rollback(1).await.unwrap();
        assert_eq!(rolled_back, vec!["002_create_folders_table"]);
        assert!(!store.has_table("folders").await);
        assert!(store.has_table("users").await);
        assert_eq!(store.record_ids().await, vec!["001_create_users_table"]);

        let rolled_back = migrator.rollback(1).await.unwrap();
        assert_eq!(rolled_back, vec!["001_create_users_table"]);
        assert!(store.tables().await.is_empty());
        assert!(store.record_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = MemoryStore::new();
        let counting = Arc::new(Counting {
            forward: AtomicUsize::new(0),
            backward: AtomicUsize::new(0),
        });
        let mut registry = MigrationRegistry::new();
        registry.register_arc(counting.clone()).unwrap();
        let migrator = Migrator::new(Arc::new(store.clone()), registry);

        assert_eq!(migrator.migrate().await.unwrap().len(), 1);
        let tables = store.tables().await;
        let records = store.record_ids().await;
        let commits = store.commits().await;

        assert!(migrator.migrate().await.unwrap().is_empty());
        assert_eq!(counting.forward.load(Ordering::SeqCst), 1);
        assert_eq!(store.tables().await, tables);
        assert_eq!(store.record_ids().await, records);
        assert_eq!(store.commits().await, commits);

        migrator.rollback(1).await.unwrap();
        assert_eq!(counting.backward.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_order_not_lexical() {
        // Lexical sort would run the folders migration first and fail.
        let store = MemoryStore::new();
        let users = SqlMigration::new("b_create_users", "CREATE TABLE users (id INT);");
        let folders = SqlMigration::new(
            "a_create_folders",
            "CREATE TABLE folders (id INT, user_id INT REFERENCES users(id));",
        );
        let migrator = migrator_for(&store, vec![users, folders]);

        let applied = migrator.migrate().await.unwrap();
        assert_eq!(applied, vec!["b_create_users", "a_create_folders"]);
    }

    #[tokio::test]
    async fn test_reversed_registration_fails_dependent_forward() {
        let store = MemoryStore::new();
        let migrator = migrator_for(&store, vec![folders(), users()]);

        let err = migrator.migrate().await.unwrap_err();
        assert_eq!(err.migration_id(), Some("002_create_folders_table"));
        assert!(matches!(err, StrataError::Migration { .. }));
        // Fail fast: users was never attempted.
        assert!(store.tables().await.is_empty());
        assert!(store.record_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_prefix() {
        let store = MemoryStore::new();
        let broken = SqlMigration::new(
            "002_broken",
            "CREATE TABLE half_done (id INT);\nALTER TABLE missing ADD COLUMN x INT;",
        );
        let migrator = migrator_for(
            &store,
            vec![users(), broken, table("003_after", "after_broken")],
        );

        let err = migrator.migrate().await.unwrap_err();
        assert_eq!(err.migration_id(), Some("002_broken"));
        assert_eq!(store.record_ids().await, vec!["001_create_users_table"]);
        assert_eq!(store.tables().await, vec!["users"]);

        // Re-running after the failure resumes at the broken unit.
        let fixed = SqlMigration::new("002_broken", "CREATE TABLE half_done (id INT);");
        let migrator = migrator_for(
            &store,
            vec![users(), fixed, table("003_after", "after_broken")],
        );
        let applied = migrator.migrate().await.unwrap();
        assert_eq!(applied, vec!["002_broken", "003_after"]);
    }

    #[tokio::test]
    async fn test_record_insert_failure_rolls_back_schema() {
        let store = MemoryStore::new();
        store.fail_record_insert("002_create_folders_table").await;
        let migrator = migrator_for(&store, vec![users(), folders()]);

        let err = migrator.migrate().await.unwrap_err();
        assert!(matches!(err, StrataError::Bookkeeping { ref id, .. } if id == "002_create_folders_table"));
        assert!(!store.has_table("folders").await);
        assert_eq!(store.record_ids().await, vec!["001_create_users_table"]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_annotated() {
        let store = MemoryStore::new();
        store.fail_commits(true).await;
        let migrator = migrator_for(&store, vec![users()]);

        let err = migrator.migrate().await.unwrap_err();
        assert!(matches!(err, StrataError::Commit { ref id, .. } if id == "001_create_users_table"));
        assert!(store.tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = MemoryStore::new();
        store.set_unreachable(true).await;
        let migrator = migrator_for(&store, vec![users()]);

        assert!(matches!(
            migrator.migrate().await,
            Err(StrataError::Connection(_))
        ));
        assert!(matches!(
            migrator.rollback(1).await,
            Err(StrataError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_uses_apply_time_not_lexical_order() {
        let store = MemoryStore::new();
        let migrator = migrator_for(
            &store,
            vec![
                table("c_first", "first"),
                table("a_second", "second"),
                table("b_third", "third"),
            ],
        );
        migrator.migrate().await.unwrap();

        let rolled_back = migrator.rollback(2).await.unwrap();
        assert_eq!(rolled_back, vec!["b_third", "a_second"]);
        assert_eq!(store.record_ids().await, vec!["c_first"]);
        assert_eq!(store.tables().await, vec!["first"]);
    }

    #[tokio::test]
    async fn test_rollback_follows_apply_time_not_registration() {
        let store = MemoryStore::new();
        migrator_for(&store, vec![table("002_late", "late")])
            .migrate()
            .await
            .unwrap();

        // 001 is registered first but applied after 002.
        let migrator = migrator_for(
            &store,
            vec![table("001_early", "early"), table("002_late", "late")],
        );
        assert_eq!(migrator.migrate().await.unwrap(), vec!["001_early"]);

        assert_eq!(migrator.rollback(1).await.unwrap(), vec!["001_early"]);
        assert!(store.has_table("late").await);
    }

    #[tokio::test]
    async fn test_rollback_tie_on_timestamp_uses_sequence() {
        use chrono::TimeZone;

        let store = MemoryStore::new();
        store
            .freeze_clock(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .await;
        let migrator = migrator_for(
            &store,
            vec![table("z_one", "one"), table("a_two", "two"), table("m_three", "three")],
        );
        migrator.migrate().await.unwrap();

        assert_eq!(migrator.rollback(1).await.unwrap(), vec!["m_three"]);
        assert_eq!(migrator.rollback(1).await.unwrap(), vec!["a_two"]);
    }

    #[tokio::test]
    async fn test_rollback_skips_unknown_migration() {
        let store = MemoryStore::new();
        migrator_for(&store, vec![users(), folders()])
            .migrate()
            .await
            .unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        // folders removed from the registry after it was applied
        let migrator = migrator_for(&store, vec![users()]);
        let rolled_back = migrator.rollback(1).await.unwrap();
        assert!(rolled_back.is_empty());

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Migration not found in registry, skipping rollback"));
        assert!(output.contains("002_create_folders_table"));
        assert!(store.has_table("folders").await);
        assert_eq!(
            store.record_ids().await,
            vec!["001_create_users_table", "002_create_folders_table"]
        );
    }

    #[tokio::test]
    async fn test_rollback_continues_past_unknown_migration() {
        let store = MemoryStore::new();
        migrator_for(&store, vec![table("001_a", "a"), table("002_b", "b")])
            .migrate()
            .await
            .unwrap();

        let migrator = migrator_for(&store, vec![table("001_a", "a")]);
        let rolled_back = migrator.rollback(2).await.unwrap();
        assert_eq!(rolled_back, vec!["001_a"]);
        assert_eq!(store.record_ids().await, vec!["002_b"]);
    }

    #[tokio::test]
    async fn test_rollback_failure_aborts_sequence() {
        let store = MemoryStore::new();
        let irreversible = SqlMigration::new("002_irreversible", "CREATE TABLE audit (id INT);");
        let migrator = migrator_for(
            &store,
            vec![users(), irreversible, table("003_tags", "tags")],
        );
        migrator.migrate().await.unwrap();

        let err = migrator.rollback(3).await.unwrap_err();
        assert!(matches!(err, StrataError::Rollback { ref id, .. } if id == "002_irreversible"));
        // 003 was undone before the failure, 002 and 001 remain.
        assert_eq!(
            store.record_ids().await,
            vec!["001_create_users_table", "002_irreversible"]
        );
        assert!(store.has_table("audit").await);
        assert!(store.has_table("users").await);
        assert!(!store.has_table("tags").await);
    }

    #[tokio::test]
    async fn test_record_delete_failure_restores_schema() {
        let store = MemoryStore::new();
        let migrator = migrator_for(&store, vec![users(), folders()]);
        migrator.migrate().await.unwrap();
        store.fail_record_delete("002_create_folders_table").await;

        let err = migrator.rollback(1).await.unwrap_err();
        assert!(matches!(err, StrataError::Bookkeeping { .. }));
        assert!(store.has_table("folders").await);
        assert_eq!(store.record_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_zero_rejected() {
        let store = MemoryStore::new();
        let migrator = migrator_for(&store, vec![users()]);
        assert!(matches!(
            migrator.rollback(0).await,
            Err(StrataError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_more_than_applied() {
        let store = MemoryStore::new();
        let migrator = migrator_for(&store, vec![users(), folders(), files()]);
        assert!(migrator.rollback(5).await.unwrap().is_empty());

        migrator.migrate().await.unwrap();
        let rolled_back = migrator.rollback(5).await.unwrap();
        assert_eq!(rolled_back.len(), 3);
        assert!(store.tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_pending_and_orphaned() {
        let store = MemoryStore::new();
        migrator_for(&store, vec![users(), table("002_legacy", "legacy")])
            .migrate()
            .await
            .unwrap();

        let irreversible = SqlMigration::new("003_audit", "CREATE TABLE audit (id INT);");
        let migrator = migrator_for(&store, vec![users(), irreversible, folders()]);
        let status = migrator.status().await.unwrap();

        assert!(!status.is_up_to_date());
        assert_eq!(status.pending, vec!["003_audit", "002_create_folders_table"]);
        assert_eq!(status.applied.len(), 2);
        assert!(status.applied[0].known);
        assert!(status.applied[0].reversible);

        let orphaned: Vec<_> = status.orphaned().map(|m| m.id.as_str()).collect();
        assert_eq!(orphaned, vec!["002_legacy"]);

        migrator.migrate().await.unwrap();
        let status = migrator.status().await.unwrap();
        assert!(status.is_up_to_date());
        let audit = status.applied.iter().find(|m| m.id == "003_audit").unwrap();
        assert!(!audit.reversible);
    }
}
