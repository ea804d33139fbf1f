//! Driver-neutral results of write operations.

use bson::Bson;

/// Counts reported by an update or replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// Id of the inserted document when the call upserted.
    pub upserted_id: Option<Bson>,
}

/// Count reported by a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Summary counts of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
}

/// The result a write produced before it was turned into an error.
///
/// Updates, replaces and deletes that affect no document still report their counts;
/// the classified error carries them so callers can inspect what the driver returned.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialResult {
    Update(UpdateResult),
    Delete(DeleteResult),
}

impl PartialResult {
    pub fn as_update(&self) -> Option<&UpdateResult> {
        match self {
            PartialResult::Update(result) => Some(result),
            PartialResult::Delete(_) => None,
        }
    }

    pub fn as_delete(&self) -> Option<&DeleteResult> {
        match self {
            PartialResult::Delete(result) => Some(result),
            PartialResult::Update(_) => None,
        }
    }
}
