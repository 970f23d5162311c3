//! Explicit PostgreSQL provisioning for integration tests.
//!
//! Only `TEST_DATABASE_URL` is read, never `DATABASE_URL`, so a test run can
//! not touch a real application database by accident.

use sqlx::PgPool;

use crate::error::{Result, StrataError};

const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Database handle for integration tests.
pub struct TestDatabase {
    pool: PgPool,
    url: String,
}

impl TestDatabase {
    /// Connect to database at the given URL.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(|e| StrataError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Connect using the TEST_DATABASE_URL environment variable.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var(TEST_DATABASE_URL).map_err(|_| {
            StrataError::Config(
                "TEST_DATABASE_URL not set. Set it explicitly for database tests.".to_string(),
            )
        })?;
        Self::from_url(&url).await
    }

    /// Whether TEST_DATABASE_URL is set; tests skip themselves otherwise.
    pub fn is_configured() -> bool {
        std::env::var(TEST_DATABASE_URL).is_ok_and(|url| !url.is_empty())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run raw SQL to set up or tear down test state.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(StrataError::Sql)?;
        Ok(())
    }
}
