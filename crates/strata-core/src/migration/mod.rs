//! Migration unit and record store abstractions.

mod record;
mod traits;

pub use record::{MigrationRecord, RecordOrder};
pub use traits::{BoxFuture, Migration, MigrationStore, SchemaTransaction};
