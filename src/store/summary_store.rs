//! SummaryStore — the per-approver summary rows behind "pending approvals"
//! views.
//!
//! Writes follow last-writer-wins on business time: a row is applied only
//! when nothing is stored yet or the incoming `operation_date_time` is
//! strictly newer. A lost first-writer race (insert conflict) is
//! success-equivalent. Prior failure messages on the stored row are folded
//! into the append-only array in DetailStore before the row is replaced.

use std::sync::Arc;

use anyhow::Context;

use crate::errors::PipelineError;
use crate::models::SummaryRow;
use crate::tenant::TenantConfig;

use super::detail_store::DetailStore;
use super::kv::{KeyValueStore, KvError, KvRow};
use super::RowDeletionResult;

const SUMMARY_TABLE: &str = "summary";

pub struct SummaryStore {
    kv: Arc<dyn KeyValueStore>,
    details: Arc<DetailStore>,
}

impl SummaryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, details: Arc<DetailStore>) -> Self {
        Self { kv, details }
    }

    /// Apply a batch of summary rows under the ordering rule.
    ///
    /// Returns the number of rows actually written.
    pub async fn add_summary(
        &self,
        tenant: &TenantConfig,
        rows: &[SummaryRow],
    ) -> Result<usize, PipelineError> {
        let mut written = 0usize;
        for row in rows {
            let partition = row.partition_key();
            let row_key = row.row_key(tenant.use_display_document_number);

            let existing = self.kv.get(SUMMARY_TABLE, &partition, &row_key).await?;
            let existing: Option<SummaryRow> = match existing {
                Some(kv_row) => {
                    Some(serde_json::from_value(kv_row.data).context("summary row deserializes")?)
                }
                None => None,
            };

            if let Some(stored) = &existing {
                if stored.operation_date_time >= row.operation_date_time {
                    tracing::debug!(
                        approver = %row.approver,
                        row_key = %row_key,
                        "stored summary is as new or newer, skipping write"
                    );
                    continue;
                }
                // keep the failure trail across replacements
                if let Some(failed) = &stored.last_failed {
                    let doc_key = row
                        .identifier
                        .document_key(tenant.use_display_document_number);
                    self.details.record_failure(doc_key, failed).await?;
                }
            }

            let kv_row = KvRow::new(
                &partition,
                &row_key,
                serde_json::to_value(row).context("summary row serializes")?,
            );
            let result = if existing.is_some() {
                self.kv.upsert(SUMMARY_TABLE, kv_row).await
            } else {
                self.kv.insert(SUMMARY_TABLE, kv_row).await
            };
            match result {
                Ok(()) => written += 1,
                // concurrent first writer beat us to it; their row stands
                Err(KvError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    /// Point lookup of an approver's row for one document.
    pub async fn get_by_document_and_approver(
        &self,
        tenant: &TenantConfig,
        document_key: &str,
        approver: &str,
    ) -> Result<Option<SummaryRow>, PipelineError> {
        let row_key = format!("{}|{}", tenant.document_type_id, document_key);
        let row = self
            .kv
            .get(SUMMARY_TABLE, &approver.to_lowercase(), &row_key)
            .await?;
        row.map(|r| {
            serde_json::from_value(r.data)
                .context("summary row deserializes")
                .map_err(PipelineError::from)
        })
        .transpose()
    }

    /// Cross-partition scan: every approver's row for a document.
    pub async fn get_by_row_key(
        &self,
        tenant: &TenantConfig,
        document_key: &str,
    ) -> Result<Vec<SummaryRow>, PipelineError> {
        let row_key = format!("{}|{}", tenant.document_type_id, document_key);
        let rows = self.kv.query_row_key(SUMMARY_TABLE, &row_key).await?;
        rows.into_iter()
            .map(|r| {
                serde_json::from_value(r.data)
                    .context("summary row deserializes")
                    .map_err(PipelineError::from)
            })
            .collect()
    }

    /// Count of live rows pending for an approver.
    pub async fn get_counts_by_approver(&self, approver: &str) -> Result<usize, PipelineError> {
        let rows = self
            .kv
            .query_partition(SUMMARY_TABLE, &approver.to_lowercase())
            .await?;
        let mut live = 0usize;
        for row in rows {
            let summary: SummaryRow =
                serde_json::from_value(row.data).context("summary row deserializes")?;
            if summary.is_live() {
                live += 1;
            }
        }
        Ok(live)
    }

    /// Remove a resolved set of summary rows.
    pub async fn remove_rows(
        &self,
        tenant: &TenantConfig,
        rows: &[SummaryRow],
    ) -> Result<RowDeletionResult, PipelineError> {
        if rows.is_empty() {
            return Ok(RowDeletionResult::SkippedDueToNonExistence);
        }
        let mut removed = 0usize;
        for row in rows {
            let row_key = row.row_key(tenant.use_display_document_number);
            if self
                .kv
                .delete(SUMMARY_TABLE, &row.partition_key(), &row_key)
                .await?
            {
                removed += 1;
            }
        }
        if removed == 0 {
            Ok(RowDeletionResult::SkippedDueToNonExistence)
        } else {
            Ok(RowDeletionResult::DeletionSuccessful)
        }
    }
}
