pub mod config;
pub mod error;
pub mod migration;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::StrataConfig;
pub use error::{Result, StrataError};
pub use migration::{
    BoxFuture, Migration, MigrationRecord, MigrationStore, RecordOrder, SchemaTransaction,
};
