pub mod blob;
pub mod detail_store;
pub mod doc_lock;
pub mod history_store;
pub mod kv;
pub mod summary_store;

pub use blob::BlobStore;
pub use detail_store::{DetailStore, DetailWriteReport};
pub use doc_lock::{DocumentLock, DocumentLockOptions, LockGuard};
pub use history_store::HistoryStore;
pub use kv::{KeyValueStore, KvError, KvRow, MemoryKv};
pub use summary_store::SummaryStore;

/// Outcome of a row-deletion pass over a storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDeletionResult {
    DeletionSuccessful,
    DeletionFailed,
    /// Nothing to delete; the rows were never there (or already gone).
    SkippedDueToNonExistence,
    /// The stored state is newer than the request; deleting would undo a
    /// later write, so nothing was touched.
    SkippedDueToRaceCondition,
}
