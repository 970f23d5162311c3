use chrono::{DateTime, Utc};

/// Proof that a migration's forward change was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Id of the migration this row records.
    pub id: String,
    /// Set by the store when the row is inserted.
    pub applied_at: DateTime<Utc>,
    /// Store-assigned insertion counter; breaks `applied_at` ties.
    pub seq: i64,
}

/// Ordering for [`MigrationStore::list_applied`](super::MigrationStore::list_applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// Oldest first, by insertion sequence.
    #[default]
    Applied,
    /// Newest first, by `applied_at` then sequence.
    LatestFirst,
}

impl RecordOrder {
    /// Sort records in place.
    pub fn sort(self, records: &mut [MigrationRecord]) {
        match self {
            Self::Applied => records.sort_by_key(|r| r.seq),
            Self::LatestFirst => records.sort_by(|a, b| {
                b.applied_at
                    .cmp(&a.applied_at)
                    .then_with(|| b.seq.cmp(&a.seq))
            }),
        }
    }
}
