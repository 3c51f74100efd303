//! RequestProcessor — the Create/Update/Delete state machine.
//!
//! One entry per canonical request: reconciles the request against the
//! stored summary/detail state, honors the per-step resume flags, and
//! hands off to the notification dispatcher. Business time
//! (`operation_date_time`) decides whether a write applies, independent of
//! arrival order.

mod create;
mod delete;
mod update;

use std::sync::Arc;

use crate::errors::PipelineError;
use crate::models::{CanonicalRequest, Operation};
use crate::notification::NotificationDispatcher;
use crate::store::{BlobStore, DetailStore, HistoryStore, RowDeletionResult, SummaryStore};
use crate::tenant::TenantAdapter;

/// Per-operation result taxonomy.
#[derive(Debug)]
pub enum OperationOutcome {
    Success,
    /// Wraps the failure; the receiver decides between drop and escalate
    /// based on whether it is terminal.
    Error(PipelineError),
    /// The request fell through without reaching a terminal branch:
    /// a defect signal, treated as handled.
    Unknown,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

/// What `process` concluded, including the deletion sub-result when the
/// operation had a delete phase.
#[derive(Debug)]
pub struct ProcessReport {
    pub outcome: OperationOutcome,
    pub deletion: Option<RowDeletionResult>,
}

/// Message-scoped context threaded into side effects.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub correlation_id: String,
    /// Blob id of the staged inbound body, when the message was
    /// pointer-only; reused for the staged notification envelope.
    pub staged_blob_id: Option<String>,
}

impl MessageContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            staged_blob_id: None,
        }
    }
}

#[derive(Clone)]
pub struct RequestProcessor {
    pub(crate) summaries: Arc<SummaryStore>,
    pub(crate) details: Arc<DetailStore>,
    pub(crate) history: Arc<HistoryStore>,
    pub(crate) dispatcher: Arc<NotificationDispatcher>,
    pub(crate) blob: BlobStore,
}

impl RequestProcessor {
    pub fn new(
        summaries: Arc<SummaryStore>,
        details: Arc<DetailStore>,
        history: Arc<HistoryStore>,
        dispatcher: Arc<NotificationDispatcher>,
        blob: BlobStore,
    ) -> Self {
        Self {
            summaries,
            details,
            history,
            dispatcher,
            blob,
        }
    }

    /// Run one canonical request to completion.
    ///
    /// Mutates the request's progress flags in place so a caller that
    /// escalates the payload carries the resume state along.
    pub async fn process(
        &self,
        tenant: &Arc<dyn TenantAdapter>,
        request: &mut CanonicalRequest,
        ctx: &MessageContext,
    ) -> ProcessReport {
        tenant.modify_request(request);

        let document = request.identifier.document_number.clone();
        let result = match request.operation {
            Operation::Create => create::run(self, tenant, request, ctx).await.map(|()| None),
            Operation::Update => update::run(self, tenant, request, ctx).await.map(|()| None),
            Operation::Delete => delete::run(self, tenant, request, true, false, ctx)
                .await
                .map(Some),
            Operation::Unknown => {
                tracing::error!(document = %document, "request carried an unrecognized operation");
                return ProcessReport {
                    outcome: OperationOutcome::Unknown,
                    deletion: None,
                };
            }
        };

        match result {
            Ok(deletion) => {
                tracing::info!(
                    document = %document,
                    operation = ?request.operation,
                    xcv = %request.telemetry.xcv,
                    "request processed"
                );
                ProcessReport {
                    outcome: OperationOutcome::Success,
                    deletion,
                }
            }
            Err(e) => {
                tracing::error!(
                    document = %document,
                    operation = ?request.operation,
                    error = %e,
                    "request processing failed"
                );
                ProcessReport {
                    outcome: OperationOutcome::Error(e),
                    deletion: None,
                }
            }
        }
    }
}
