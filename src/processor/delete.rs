//! Delete: remove summary and detail rows, record history, notify.
//!
//! The ordering guarantee lives here: with race handling on, stored rows
//! carrying a newer business time than the request make the whole deletion
//! a no-op (`SkippedDueToRaceCondition`). The opposite race, a delete
//! arriving before its create settled, gets a bounded wait and then a tenant
//! refetch before the outcome is `SkippedDueToNonExistence`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::models::{ApproverChainEntry, CanonicalRequest, SummaryRow, TransactionHistory};
use crate::store::blob::containers;
use crate::store::RowDeletionResult;
use crate::tenant::{TenantAdapter, TenantConfig};

use super::{MessageContext, RequestProcessor};

pub(super) async fn run(
    p: &RequestProcessor,
    tenant: &Arc<dyn TenantAdapter>,
    request: &mut CanonicalRequest,
    notify: bool,
    for_update: bool,
    ctx: &MessageContext,
) -> Result<RowDeletionResult, PipelineError> {
    let cfg = tenant.config();
    let doc_key = request
        .identifier
        .document_key(cfg.use_display_document_number)
        .to_string();

    let mut rows = resolve_rows(p, cfg, request, &doc_key).await?;

    if rows.is_empty() && cfg.race_condition_handling {
        // the create for this document may not have settled yet
        for attempt in 1..=cfg.race_retry_budget {
            tokio::time::sleep(Duration::from_millis(cfg.race_retry_delay_ms)).await;
            debug!(document = %doc_key, attempt, "summary rows not visible yet, retrying");
            rows = resolve_rows(p, cfg, request, &doc_key).await?;
            if !rows.is_empty() {
                break;
            }
        }
        if rows.is_empty() {
            rows = refetch_and_lookup(p, tenant, request, &doc_key).await?;
        }
    }

    let deletion = if rows.is_empty() {
        debug!(document = %doc_key, "no summary rows to remove");
        RowDeletionResult::SkippedDueToNonExistence
    } else {
        if cfg.race_condition_handling
            && rows
                .iter()
                .any(|r| r.operation_date_time > request.operation_date_time)
        {
            info!(
                document = %doc_key,
                "stored summary is newer than the request, skipping deletion"
            );
            return Ok(RowDeletionResult::SkippedDueToRaceCondition);
        }

        let result = p.summaries.remove_rows(cfg, &rows).await?;

        // attachment names live in a detail row, read them before the purge
        let attachment_names = p.details.attachment_names(&doc_key).await?;
        p.details.remove_details(&doc_key, for_update).await?;
        for name in attachment_names {
            if let Err(e) = p.blob.delete(containers::ATTACHMENTS, &name).await {
                warn!(blob = %name, error = %e, "attachment blob deletion failed");
            }
        }
        result
    };

    record_history(p, request, &rows, &doc_key).await?;
    request.progress.delete_complete = true;

    if notify && cfg.notification_enabled && !request.progress.notification_sent {
        p.dispatcher
            .dispatch(
                cfg,
                request,
                &rows,
                true,
                &ctx.correlation_id,
                ctx.staged_blob_id.as_deref(),
            )
            .await;
    }

    Ok(deletion)
}

/// Resolve which summary rows the delete targets, in priority order:
/// the explicit `delete_for` list, then the recorded current approvers,
/// then a cross-partition scan on the document row key.
async fn resolve_rows(
    p: &RequestProcessor,
    cfg: &TenantConfig,
    request: &CanonicalRequest,
    doc_key: &str,
) -> Result<Vec<SummaryRow>, PipelineError> {
    if let Some(aliases) = &request.delete_for {
        if !aliases.is_empty() {
            return lookup_by_aliases(p, cfg, doc_key, aliases).await;
        }
    }

    if let Some(aliases) = p.details.current_approvers(doc_key).await? {
        if !aliases.is_empty() {
            let rows = lookup_by_aliases(p, cfg, doc_key, &aliases).await?;
            if !rows.is_empty() {
                return Ok(rows);
            }
        }
    }

    p.summaries.get_by_row_key(cfg, doc_key).await
}

async fn lookup_by_aliases(
    p: &RequestProcessor,
    cfg: &TenantConfig,
    doc_key: &str,
    aliases: &[String],
) -> Result<Vec<SummaryRow>, PipelineError> {
    let mut rows = Vec::new();
    for alias in aliases {
        if let Some(row) = p
            .summaries
            .get_by_document_and_approver(cfg, doc_key, alias)
            .await?
        {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Last resort for the delete-before-create race: ask the tenant who the
/// approvers are and look their rows up one final time.
async fn refetch_and_lookup(
    p: &RequestProcessor,
    tenant: &Arc<dyn TenantAdapter>,
    request: &CanonicalRequest,
    doc_key: &str,
) -> Result<Vec<SummaryRow>, PipelineError> {
    let cfg = tenant.config();
    match tenant.fetch_summary(&request.identifier).await {
        Ok(fresh) => {
            let mut aliases: Vec<String> = Vec::new();
            for row in &fresh {
                let alias = row.approver.to_lowercase();
                if !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            }
            lookup_by_aliases(p, cfg, doc_key, &aliases).await
        }
        Err(e) => {
            debug!(document = %doc_key, error = %e, "tenant refetch failed during delete");
            Ok(Vec::new())
        }
    }
}

/// Append the terminal action to history and the approver chain, guarded
/// by the idempotence check so replays do not duplicate audit records.
async fn record_history(
    p: &RequestProcessor,
    request: &mut CanonicalRequest,
    rows: &[SummaryRow],
    doc_key: &str,
) -> Result<(), PipelineError> {
    let Some(action) = request.action_detail.clone() else {
        return Ok(());
    };
    if request.progress.history_logged {
        return Ok(());
    }

    let record = TransactionHistory {
        document_number: request.identifier.document_number.clone(),
        approver: action.action_by.clone(),
        action_taken: action.name.clone(),
        action_date: request.operation_date_time,
        json_data: (!rows.is_empty())
            .then(|| serde_json::to_string(rows).context("summary rows serialize"))
            .transpose()?,
        approvers_note: action.approvers_note.clone(),
    };

    if !p.history.check_if_inserted(&record).await? {
        p.history.insert(&record).await?;
        p.details.record_transaction(doc_key, &record).await?;
        p.details
            .append_chain_entry(
                doc_key,
                ApproverChainEntry {
                    alias: action.action_by,
                    action: action.name,
                    action_date: request.operation_date_time,
                    kind: None,
                    justification: action.approvers_note,
                },
            )
            .await?;
    }
    request.progress.history_logged = true;
    Ok(())
}
