//! Update = Delete(notify=false) then Create.
//!
//! The delete phase preserves the current-approver, summary-snapshot and
//! approver-chain rows; a failed delete fails the whole operation and the
//! create phase never runs. A delete skipped because the stored state is
//! newer voids the whole update: the create phase would overwrite the
//! snapshot and approver rows with the stale payload. The
//! `delete_complete` flag lets a replayed update resume straight into the
//! create phase.

use std::sync::Arc;

use tracing::info;

use crate::errors::PipelineError;
use crate::models::CanonicalRequest;
use crate::store::RowDeletionResult;
use crate::tenant::TenantAdapter;

use super::{create, delete, MessageContext, RequestProcessor};

pub(super) async fn run(
    p: &RequestProcessor,
    tenant: &Arc<dyn TenantAdapter>,
    request: &mut CanonicalRequest,
    ctx: &MessageContext,
) -> Result<(), PipelineError> {
    if !request.progress.delete_complete {
        let deletion = delete::run(p, tenant, request, false, true, ctx).await?;
        if deletion == RowDeletionResult::SkippedDueToRaceCondition {
            info!(
                document = %request.identifier.document_number,
                "stored state is newer than the update, skipping the create phase"
            );
            return Ok(());
        }
    }
    create::run(p, tenant, request, ctx).await
}
