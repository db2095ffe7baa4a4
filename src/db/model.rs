//! View models returned by aggregate repository queries.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::SyncStatus;

/// Number of materials per sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub synced: i64,
    pub pending: i64,
    pub syncing: i64,
    pub conflict: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: SyncStatus, count: i64) {
        match status {
            SyncStatus::Synced => self.synced += count,
            SyncStatus::Pending => self.pending += count,
            SyncStatus::Syncing => self.syncing += count,
            SyncStatus::Conflict => self.conflict += count,
            SyncStatus::Error => self.error += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.synced + self.pending + self.syncing + self.conflict + self.error
    }

    /// Records the engine still owes a push.
    pub fn outstanding(&self) -> i64 {
        self.pending + self.error
    }
}
