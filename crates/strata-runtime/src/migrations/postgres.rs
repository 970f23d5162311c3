//! PostgreSQL record store.
//!
//! PostgreSQL runs DDL inside transactions, so a unit's schema change and its
//! record row commit together.

use chrono::{DateTime, Utc};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Transaction};
use strata_core::config::is_sql_identifier;
use strata_core::error::{Result, StrataError};
use strata_core::migration::{
    BoxFuture, MigrationRecord, MigrationStore, RecordOrder, SchemaTransaction,
};

/// Default name of the record table.
pub const DEFAULT_RECORD_TABLE: &str = "migration_records";

/// [`MigrationStore`] backed by a sqlx PostgreSQL pool.
#[derive(Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
    table: String,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_RECORD_TABLE.to_string(),
        }
    }

    /// Use a custom record table. The name is interpolated into SQL and must
    /// be a plain identifier.
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_sql_identifier(&table) {
            return Err(StrataError::Config(format!(
                "Invalid record table name: {}",
                table
            )));
        }
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn fetch_records(&self, sql: &str, limit: Option<i64>) -> Result<Vec<MigrationRecord>> {
        let mut query = sqlx::query_as::<_, (String, DateTime<Utc>, i64)>(sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to get applied migrations", e))?;

        Ok(rows
            .into_iter()
            .map(|(id, applied_at, seq)| MigrationRecord {
                id,
                applied_at,
                seq,
            })
            .collect())
    }
}

impl MigrationStore for PgMigrationStore {
    fn ensure_table(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    seq BIGSERIAL NOT NULL,
                    id VARCHAR(255) PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
                self.table
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("Failed to create migrations table", e))?;

            // Tables created by earlier tooling hold only (id, applied_at)
            let (has_seq,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 AND column_name = 'seq')",
            )
            .bind(self.table.to_ascii_lowercase())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("Failed to inspect migrations table", e))?;

            if !has_seq {
                let sql = format!("ALTER TABLE {} ADD COLUMN seq BIGSERIAL", self.table);
                sqlx::query(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to upgrade migrations table", e))?;
            }
            Ok(())
        })
    }

    fn list_applied(&self, order: RecordOrder) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT id, applied_at, seq FROM {} ORDER BY {}",
                self.table,
                order_clause(order)
            );
            self.fetch_records(&sql, None).await
        })
    }

    fn latest_applied(&self, limit: usize) -> BoxFuture<'_, Result<Vec<MigrationRecord>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT id, applied_at, seq FROM {} ORDER BY {} LIMIT $1",
                self.table,
                order_clause(RecordOrder::LatestFirst)
            );
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            self.fetch_records(&sql, Some(limit)).await
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn SchemaTransaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(|e| {
                StrataError::Connection(format!("Failed to begin transaction: {}", e))
            })?;

            let tx: Box<dyn SchemaTransaction> = Box::new(PgSchemaTransaction {
                tx,
                table: self.table.clone(),
            });
            Ok(tx)
        })
    }
}

struct PgSchemaTransaction {
    tx: Transaction<'static, Postgres>,
    table: String,
}

impl SchemaTransaction for PgSchemaTransaction {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(statement)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StrataError::Statement(e.to_string()))?;
            Ok(())
        })
    }

    fn insert_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!("INSERT INTO {} (id, applied_at) VALUES ($1, NOW())", self.table);
            sqlx::query(&sql)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StrataError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_record<'a>(&'a mut self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
            let result = sqlx::query(&sql)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StrataError::Database(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(StrataError::Database(format!("no record for '{}'", id)));
            }
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let PgSchemaTransaction { tx, .. } = *self;
        Box::pin(async move { tx.commit().await.map_err(|e| store_error("Commit failed", e)) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let PgSchemaTransaction { tx, .. } = *self;
        Box::pin(async move {
            tx.rollback()
                .await
                .map_err(|e| store_error("Rollback failed", e))
        })
    }
}

fn order_clause(order: RecordOrder) -> &'static str {
    match order {
        RecordOrder::Applied => "seq ASC",
        RecordOrder::LatestFirst => "applied_at DESC, seq DESC",
    }
}

/// Lost connections surface as `Connection`, everything else as `Database`.
fn store_error(context: &str, e: sqlx::Error) -> StrataError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StrataError::Connection(format!("{}: {}", context, e)),
        e => StrataError::Database(format!("{}: {}", context, e)),
    }
}
