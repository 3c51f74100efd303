use thiserror::Error;

use crate::queue::QueueError;
use crate::store::KvError;

/// Error taxonomy for the approval pipeline.
///
/// Variants split into two families the receiver cares about:
/// - terminal (validation, missing summary, unrecognized operation):
///   the message is considered handled, no re-queue;
/// - everything else: escalated once to the retry topic.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no summary data available for document {0}")]
    NoSummaryData(String),

    #[error("unrecognized operation type")]
    UnknownOperation,

    #[error("message lock lost: {0}")]
    LockLost(String),

    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("tenant adapter error: {0}")]
    Tenant(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Terminal errors are reported and the message is considered handled;
    /// re-delivery would fail the same way.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::NoSummaryData(_)
                | PipelineError::UnknownOperation
        )
    }
}
