use thiserror::Error;

/// Core error type for strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store could not be reached or refused to open a transaction.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A schema statement was rejected by the store.
    #[error("Statement rejected: {0}")]
    Statement(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// A unit's forward body failed.
    #[error("Migration '{id}' failed: {source}")]
    Migration {
        id: String,
        #[source]
        source: Box<StrataError>,
    },

    /// A unit's backward body failed.
    #[error("Rollback of '{id}' failed: {source}")]
    Rollback {
        id: String,
        #[source]
        source: Box<StrataError>,
    },

    /// Inserting or deleting the record row failed after the schema change ran.
    #[error("Failed to update migration record '{id}': {source}")]
    Bookkeeping {
        id: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("Failed to commit '{id}': {source}")]
    Commit {
        id: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("Migration '{0}' has no down migration")]
    Irreversible(String),

    #[error("Duplicate migration id: {0}")]
    DuplicateMigration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StrataError {
    pub fn migration(id: impl Into<String>, source: StrataError) -> Self {
        Self::Migration {
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn rollback(id: impl Into<String>, source: StrataError) -> Self {
        Self::Rollback {
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn bookkeeping(id: impl Into<String>, source: StrataError) -> Self {
        Self::Bookkeeping {
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn commit(id: impl Into<String>, source: StrataError) -> Self {
        Self::Commit {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// The migration id this error was annotated with, if any.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::Migration { id, .. }
            | Self::Rollback { id, .. }
            | Self::Bookkeeping { id, .. }
            | Self::Commit { id, .. } => Some(id),
            Self::Irreversible(id) | Self::DuplicateMigration(id) => Some(id),
            _ => None,
        }
    }
}

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_carries_id() {
        let err = StrataError::migration(
            "002_create_folders_table",
            StrataError::Statement("relation \"users\" does not exist".into()),
        );
        assert_eq!(err.migration_id(), Some("002_create_folders_table"));
        assert!(err.to_string().contains("002_create_folders_table"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_connection_error_has_no_id() {
        let err = StrataError::Connection("refused".into());
        assert!(err.migration_id().is_none());
    }
}
