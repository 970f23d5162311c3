//! Testing utilities.
//!
//! [`MemoryStore`] stands in for the database in unit tests: it records
//! migrations, tracks created tables and can be told to fail at specific
//! points. [`TestDatabase`] connects to a real PostgreSQL instance when
//! `TEST_DATABASE_URL` is set.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! store.fail_record_insert("002_create_folders_table").await;
//! ```

pub mod db;
pub mod store;

pub use db::TestDatabase;
pub use store::MemoryStore;
