//! Create: materialize summary and detail rows for a new pending approval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::models::{row_keys, ApprovalIdentifier, CanonicalRequest, DetailsEntity, SummaryRow};
use crate::store::blob::containers;
use crate::tenant::TenantAdapter;

use super::{MessageContext, RequestProcessor};

const DETAIL_RETRY_PAUSE: Duration = Duration::from_millis(100);

pub(super) async fn run(
    p: &RequestProcessor,
    tenant: &Arc<dyn TenantAdapter>,
    request: &mut CanonicalRequest,
    ctx: &MessageContext,
) -> Result<(), PipelineError> {
    let cfg = tenant.config();
    let doc_key = request
        .identifier
        .document_key(cfg.use_display_document_number)
        .to_string();

    // summary rows come attached or from the line-of-business system
    let rows: Vec<SummaryRow> = match request.summary_data.clone().filter(|r| !r.is_empty()) {
        Some(rows) => rows,
        None => tenant
            .fetch_summary(&request.identifier)
            .await
            .map_err(|e| PipelineError::Tenant(e.to_string()))?,
    };
    if rows.is_empty() {
        return Err(PipelineError::NoSummaryData(
            request.identifier.document_number.clone(),
        ));
    }

    // resume semantics: the summary write happened on a prior attempt
    if request.progress.create_complete {
        debug!(document = %doc_key, "summary already written, resuming past it");
    } else {
        p.summaries.add_summary(cfg, &rows).await?;
        request.progress.create_complete = true;
    }

    // snapshot of the summary for audit/recovery
    let snapshot = DetailsEntity::inline(
        &doc_key,
        row_keys::SUMMARY_OPERATION,
        serde_json::to_string(&rows).context("summary snapshot serializes")?,
    );
    let report = p.details.add_details(&cfg.id, vec![snapshot]).await;
    if !report.all_succeeded() {
        return Err(PipelineError::Internal(anyhow::anyhow!(
            "summary snapshot write failed: {:?}",
            report.failures
        )));
    }

    // record who can currently act; Delete resolves against this
    let aliases: Vec<String> = if request.approvers.is_empty() {
        let mut seen = Vec::new();
        for row in &rows {
            let alias = row.approver.to_lowercase();
            if !seen.contains(&alias) {
                seen.push(alias);
            }
        }
        seen
    } else {
        request
            .approvers
            .iter()
            .map(|a| a.alias.to_lowercase())
            .collect()
    };
    p.details.set_current_approvers(&doc_key, &aliases).await?;

    if cfg.sync_detail_prefetch {
        secondary(p, tenant, request, &rows, &doc_key, ctx).await?;
    } else {
        // deferred best-effort path: same steps, never blocks the create
        let p = p.clone();
        let tenant = Arc::clone(tenant);
        let mut request = request.clone();
        let rows = rows.clone();
        let doc_key = doc_key.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = secondary(&p, &tenant, &mut request, &rows, &doc_key, &ctx).await {
                warn!(document = %doc_key, error = %e, "deferred secondary processing failed");
            }
        });
    }

    Ok(())
}

/// Secondary processing: detail prefetch, attachments, notification.
async fn secondary(
    p: &RequestProcessor,
    tenant: &Arc<dyn TenantAdapter>,
    request: &mut CanonicalRequest,
    rows: &[SummaryRow],
    doc_key: &str,
    ctx: &MessageContext,
) -> Result<(), PipelineError> {
    let cfg = tenant.config();
    let mut details_ok = true;

    // payloads attached to the message are stored as-is
    let mut batch: Vec<DetailsEntity> = request
        .details_data
        .iter()
        .map(|(op, payload)| DetailsEntity::inline(doc_key, op, payload.to_string()))
        .collect();

    // prefetch the rest in parallel, each operation independently retryable
    let pending: Vec<&String> = cfg
        .detail_operations
        .iter()
        .filter(|op| !request.details_data.contains_key(*op))
        .collect();
    let fetches = pending.iter().map(|op| {
        fetch_with_retry(
            tenant,
            &request.identifier,
            op.as_str(),
            cfg.detail_fetch_retries,
        )
    });
    for (op, result) in pending.iter().zip(join_all(fetches).await) {
        match result {
            Ok(payload) => batch.push(DetailsEntity::inline(doc_key, op.as_str(), payload.to_string())),
            Err(e) => {
                warn!(operation = %op, error = %e, "detail prefetch exhausted its retries");
                details_ok = false;
                if let Err(fold_err) = p.details.record_failure(doc_key, &e.to_string()).await {
                    warn!(error = %fold_err, "failed to fold prefetch failure");
                }
            }
        }
    }

    let report = p.details.add_details(&cfg.id, batch).await;
    if !report.all_succeeded() {
        details_ok = false;
    }

    if cfg.download_attachments && !request.progress.attachments_downloaded {
        match tenant.fetch_attachments(&request.identifier).await {
            Ok(attachments) => {
                let mut names = Vec::with_capacity(attachments.len());
                for attachment in attachments {
                    let name = format!("{}|{}|{}", doc_key, cfg.id, attachment.name);
                    p.blob
                        .put_text(containers::ATTACHMENTS, &name, &attachment.content)
                        .await
                        .map_err(|e| PipelineError::Blob(e.to_string()))?;
                    names.push(name);
                }
                p.details.record_attachments(doc_key, &names).await?;
                request.progress.attachments_downloaded = true;
            }
            Err(e) => {
                warn!(document = %doc_key, error = %e, "attachment download failed");
                details_ok = false;
            }
        }
    }

    if cfg.notification_enabled && !request.progress.notification_sent {
        p.dispatcher
            .dispatch(
                cfg,
                request,
                rows,
                details_ok,
                &ctx.correlation_id,
                ctx.staged_blob_id.as_deref(),
            )
            .await;
    }

    Ok(())
}

async fn fetch_with_retry(
    tenant: &Arc<dyn TenantAdapter>,
    identifier: &ApprovalIdentifier,
    operation: &str,
    attempts: u32,
) -> anyhow::Result<serde_json::Value> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match tenant.fetch_details(identifier, operation).await {
            Ok(payload) => return Ok(payload),
            Err(e) => {
                debug!(operation, attempt, error = %e, "detail fetch attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(DETAIL_RETRY_PAUSE).await;
                }
            }
        }
    }
    Err(last_error.expect("at least one attempt ran"))
}
