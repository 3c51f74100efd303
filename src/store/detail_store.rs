//! DetailStore — per-document, per-operation payload rows with transparent
//! blob overflow.
//!
//! Rows whose JSON body exceeds the underlying store's inline limit are
//! moved to blob storage (`{documentKey}|{tenantId}|{rowKey}`) and the row
//! keeps only the pointer; reads hydrate the body back so callers never see
//! the difference. The size check runs before the write where the store
//! exposes a limit, with the write-time error class as fallback.

use std::sync::Arc;

use anyhow::Context;

use crate::errors::PipelineError;
use crate::models::history::ApproverChainEntry;
use crate::models::{is_protected_on_update, row_keys, DetailsEntity, TransactionHistory};

use super::blob::{containers, BlobStore};
use super::kv::{KeyValueStore, KvError, KvRow};
use super::RowDeletionResult;

const DETAILS_TABLE: &str = "details";

/// Per-batch write accounting: rows individually partial-fail without
/// aborting the batch.
#[derive(Debug, Default)]
pub struct DetailWriteReport {
    pub written: usize,
    pub overflowed: usize,
    /// (row_key, error) pairs for rows that could not be written.
    pub failures: Vec<(String, String)>,
}

impl DetailWriteReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct DetailStore {
    kv: Arc<dyn KeyValueStore>,
    blob: BlobStore,
}

impl DetailStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, blob: BlobStore) -> Self {
        Self { kv, blob }
    }

    fn overflow_name(document_key: &str, tenant_id: &str, row_key: &str) -> String {
        format!("{}|{}|{}", document_key, tenant_id, row_key)
    }

    /// Write a batch of detail rows, overflowing oversized bodies to blob.
    pub async fn add_details(
        &self,
        tenant_id: &str,
        rows: Vec<DetailsEntity>,
    ) -> DetailWriteReport {
        let mut report = DetailWriteReport::default();
        for row in rows {
            let row_key = row.row_key.clone();
            match self.write_row(tenant_id, row).await {
                Ok(overflowed) => {
                    report.written += 1;
                    if overflowed {
                        report.overflowed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(row_key = %row_key, error = %e, "detail row write failed");
                    report.failures.push((row_key, e.to_string()));
                }
            }
        }
        report
    }

    async fn write_row(
        &self,
        tenant_id: &str,
        mut row: DetailsEntity,
    ) -> Result<bool, PipelineError> {
        let body_len = row.json_data.as_ref().map(String::len).unwrap_or(0);

        // size check ahead of the write when the store exposes its limit
        if let Some(limit) = self.kv.inline_limit() {
            if body_len > limit {
                self.overflow(tenant_id, &mut row).await?;
                self.upsert_row(&row).await?;
                return Ok(true);
            }
        }

        match self.upsert_row(&row).await {
            Ok(()) => Ok(false),
            // fallback for stores that only report the limit on write
            Err(PipelineError::Storage(KvError::PayloadTooLarge { .. })) => {
                self.overflow(tenant_id, &mut row).await?;
                self.upsert_row(&row).await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn overflow(
        &self,
        tenant_id: &str,
        row: &mut DetailsEntity,
    ) -> Result<(), PipelineError> {
        let body = row.json_data.take().unwrap_or_default();
        let name = Self::overflow_name(&row.document_key, tenant_id, &row.row_key);
        self.blob
            .put_text(containers::DETAILS_OVERFLOW, &name, &body)
            .await
            .map_err(|e| PipelineError::Blob(e.to_string()))?;
        tracing::debug!(
            document = %row.document_key,
            row_key = %row.row_key,
            bytes = body.len(),
            "detail row overflowed to blob"
        );
        row.blob_pointer = Some(name);
        Ok(())
    }

    async fn upsert_row(&self, row: &DetailsEntity) -> Result<(), PipelineError> {
        let kv_row = KvRow::new(
            &row.document_key,
            &row.row_key,
            serde_json::to_value(row).context("detail row serializes")?,
        );
        self.kv.upsert(DETAILS_TABLE, kv_row).await?;
        Ok(())
    }

    /// Read one row by operation name, hydrating from blob when the body
    /// overflowed.
    pub async fn get_by_operation(
        &self,
        document_key: &str,
        operation: &str,
    ) -> Result<Option<DetailsEntity>, PipelineError> {
        let Some(row) = self.kv.get(DETAILS_TABLE, document_key, operation).await? else {
            return Ok(None);
        };
        let mut entity: DetailsEntity =
            serde_json::from_value(row.data).context("detail row deserializes")?;
        if let Some(pointer) = &entity.blob_pointer {
            let body = self
                .blob
                .get_text(containers::DETAILS_OVERFLOW, pointer)
                .await
                .map_err(|e| PipelineError::Blob(e.to_string()))?;
            entity.json_data = Some(body);
        }
        Ok(Some(entity))
    }

    /// All detail rows for a document, without blob hydration.
    pub async fn get_all(&self, document_key: &str) -> Result<Vec<DetailsEntity>, PipelineError> {
        let rows = self.kv.query_partition(DETAILS_TABLE, document_key).await?;
        rows.into_iter()
            .map(|r| {
                serde_json::from_value(r.data)
                    .context("detail row deserializes")
                    .map_err(PipelineError::from)
            })
            .collect()
    }

    /// Remove detail rows (and their overflow blobs). When `for_update` is
    /// set, the rows the Update's Create phase extends are kept.
    pub async fn remove_details(
        &self,
        document_key: &str,
        for_update: bool,
    ) -> Result<RowDeletionResult, PipelineError> {
        let rows = self.get_all(document_key).await?;
        if rows.is_empty() {
            return Ok(RowDeletionResult::SkippedDueToNonExistence);
        }

        let mut removed = 0usize;
        for row in rows {
            if for_update && is_protected_on_update(&row.row_key) {
                continue;
            }
            if self
                .kv
                .delete(DETAILS_TABLE, document_key, &row.row_key)
                .await?
            {
                removed += 1;
            }
            if let Some(pointer) = &row.blob_pointer {
                self.blob
                    .delete(containers::DETAILS_OVERFLOW, pointer)
                    .await
                    .map_err(|e| PipelineError::Blob(e.to_string()))?;
            }
        }
        tracing::debug!(document = document_key, removed, "detail rows removed");
        Ok(RowDeletionResult::DeletionSuccessful)
    }

    // ── Sentinel rows ─────────────────────────────────────────

    pub async fn set_current_approvers(
        &self,
        document_key: &str,
        aliases: &[String],
    ) -> Result<(), PipelineError> {
        let row = DetailsEntity::inline(
            document_key,
            row_keys::CURRENT_APPROVER,
            serde_json::to_string(aliases).context("alias list serializes")?,
        );
        self.upsert_row(&row).await
    }

    pub async fn current_approvers(
        &self,
        document_key: &str,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let Some(entity) = self
            .get_by_operation(document_key, row_keys::CURRENT_APPROVER)
            .await?
        else {
            return Ok(None);
        };
        let Some(body) = entity.json_data else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&body).ok())
    }

    /// Append one link to the approver chain, stored as a single row.
    pub async fn append_chain_entry(
        &self,
        document_key: &str,
        entry: ApproverChainEntry,
    ) -> Result<(), PipelineError> {
        let mut chain: Vec<ApproverChainEntry> = match self
            .get_by_operation(document_key, row_keys::APPROVAL_CHAIN)
            .await?
        {
            Some(row) => row
                .json_data
                .as_deref()
                .and_then(|b| serde_json::from_str(b).ok())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        chain.push(entry);

        let row = DetailsEntity::inline(
            document_key,
            row_keys::APPROVAL_CHAIN,
            serde_json::to_string(&chain).context("approver chain serializes")?,
        );
        self.upsert_row(&row).await
    }

    pub async fn approver_chain(
        &self,
        document_key: &str,
    ) -> Result<Vec<ApproverChainEntry>, PipelineError> {
        Ok(self
            .get_by_operation(document_key, row_keys::APPROVAL_CHAIN)
            .await?
            .and_then(|row| {
                row.json_data
                    .as_deref()
                    .and_then(|b| serde_json::from_str(b).ok())
            })
            .unwrap_or_default())
    }

    /// Per-approver copy of a terminal action, under the
    /// `TransactionDetails|{approver}` sentinel.
    pub async fn record_transaction(
        &self,
        document_key: &str,
        record: &TransactionHistory,
    ) -> Result<(), PipelineError> {
        let row = DetailsEntity::inline(
            document_key,
            row_keys::transaction_details(&record.approver),
            serde_json::to_string(record).context("history record serializes")?,
        );
        self.upsert_row(&row).await
    }

    /// Fold a failure message into the append-only array under
    /// `AdditionalDetails`, so repeated failures accumulate rather than
    /// overwrite.
    pub async fn record_failure(
        &self,
        document_key: &str,
        message: &str,
    ) -> Result<(), PipelineError> {
        let mut extras = self.additional_details(document_key).await?;
        extras["failures"]
            .as_array_mut()
            .expect("failures is an array")
            .push(serde_json::json!({
                "message": message,
                "recorded_at": chrono::Utc::now().to_rfc3339(),
            }));
        self.put_additional_details(document_key, extras).await
    }

    /// Record the blob names of downloaded attachments so Delete can
    /// remove them later.
    pub async fn record_attachments(
        &self,
        document_key: &str,
        names: &[String],
    ) -> Result<(), PipelineError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut extras = self.additional_details(document_key).await?;
        let list = extras["attachments"]
            .as_array_mut()
            .expect("attachments is an array");
        for name in names {
            list.push(serde_json::Value::String(name.clone()));
        }
        self.put_additional_details(document_key, extras).await
    }

    pub async fn attachment_names(
        &self,
        document_key: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let extras = self.additional_details(document_key).await?;
        Ok(extras["attachments"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn additional_details(
        &self,
        document_key: &str,
    ) -> Result<serde_json::Value, PipelineError> {
        let existing = self
            .get_by_operation(document_key, row_keys::ADDITIONAL_DETAILS)
            .await?
            .and_then(|row| {
                row.json_data
                    .as_deref()
                    .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
            });
        let mut extras =
            existing.unwrap_or_else(|| serde_json::json!({ "failures": [], "attachments": [] }));
        if !extras["failures"].is_array() {
            extras["failures"] = serde_json::json!([]);
        }
        if !extras["attachments"].is_array() {
            extras["attachments"] = serde_json::json!([]);
        }
        Ok(extras)
    }

    async fn put_additional_details(
        &self,
        document_key: &str,
        extras: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let row = DetailsEntity::inline(
            document_key,
            row_keys::ADDITIONAL_DETAILS,
            extras.to_string(),
        );
        self.upsert_row(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKv;

    fn store(limit: Option<usize>) -> DetailStore {
        let kv: Arc<dyn KeyValueStore> = match limit {
            Some(l) => Arc::new(MemoryKv::with_inline_limit(l)),
            None => Arc::new(MemoryKv::new()),
        };
        DetailStore::new(kv, BlobStore::memory())
    }

    #[tokio::test]
    async fn test_inline_write_and_read() {
        let store = store(None);
        let report = store
            .add_details(
                "t1",
                vec![DetailsEntity::inline("PO-1", "LineItems", "{\"n\":1}".into())],
            )
            .await;
        assert_eq!(report.written, 1);
        assert_eq!(report.overflowed, 0);

        let row = store.get_by_operation("PO-1", "LineItems").await.unwrap().unwrap();
        assert_eq!(row.json_data.as_deref(), Some("{\"n\":1}"));
        assert!(row.blob_pointer.is_none());
    }

    #[tokio::test]
    async fn test_oversized_row_overflows_and_hydrates_identically() {
        let store = store(Some(128));
        let body = format!("{{\"data\":\"{}\"}}", "z".repeat(500));
        let report = store
            .add_details(
                "t1",
                vec![DetailsEntity::inline("PO-1", "LineItems", body.clone())],
            )
            .await;
        assert_eq!(report.overflowed, 1);

        let row = store.get_by_operation("PO-1", "LineItems").await.unwrap().unwrap();
        // byte-identical regardless of where it was served from
        assert_eq!(row.json_data.as_deref(), Some(body.as_str()));
        assert_eq!(
            row.blob_pointer.as_deref(),
            Some("PO-1|t1|LineItems")
        );
    }

    #[tokio::test]
    async fn test_remove_details_deletes_overflow_blob() {
        let store = store(Some(256));
        let body = format!("{{\"data\":\"{}\"}}", "z".repeat(500));
        store
            .add_details("t1", vec![DetailsEntity::inline("PO-1", "Big", body)])
            .await;
        assert!(store
            .blob
            .exists(containers::DETAILS_OVERFLOW, "PO-1|t1|Big")
            .await
            .unwrap());

        let result = store.remove_details("PO-1", false).await.unwrap();
        assert_eq!(result, RowDeletionResult::DeletionSuccessful);
        assert!(!store
            .blob
            .exists(containers::DETAILS_OVERFLOW, "PO-1|t1|Big")
            .await
            .unwrap());
        assert!(store.get_by_operation("PO-1", "Big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_details_on_missing_document() {
        let store = store(None);
        let result = store.remove_details("PO-404", false).await.unwrap();
        assert_eq!(result, RowDeletionResult::SkippedDueToNonExistence);
    }

    #[tokio::test]
    async fn test_update_delete_preserves_protected_rows() {
        let store = store(None);
        store
            .add_details(
                "t1",
                vec![
                    DetailsEntity::inline("PO-1", "LineItems", "{}".into()),
                    DetailsEntity::inline("PO-1", row_keys::SUMMARY_OPERATION, "[]".into()),
                ],
            )
            .await;
        store
            .set_current_approvers("PO-1", &["alice".into()])
            .await
            .unwrap();
        store
            .append_chain_entry(
                "PO-1",
                ApproverChainEntry {
                    alias: "alice".into(),
                    action: "Approve".into(),
                    action_date: chrono::Utc::now(),
                    kind: None,
                    justification: None,
                },
            )
            .await
            .unwrap();

        store.remove_details("PO-1", true).await.unwrap();

        let remaining = store.get_all("PO-1").await.unwrap();
        let keys: Vec<&str> = remaining.iter().map(|r| r.row_key.as_str()).collect();
        assert!(keys.contains(&row_keys::CURRENT_APPROVER));
        assert!(keys.contains(&row_keys::SUMMARY_OPERATION));
        assert!(keys.contains(&row_keys::APPROVAL_CHAIN));
        assert!(!keys.contains(&"LineItems"));
    }

    #[tokio::test]
    async fn test_failure_fold_accumulates() {
        let store = store(None);
        store.record_failure("PO-1", "first").await.unwrap();
        store.record_failure("PO-1", "second").await.unwrap();

        let row = store
            .get_by_operation("PO-1", row_keys::ADDITIONAL_DETAILS)
            .await
            .unwrap()
            .unwrap();
        let extras: serde_json::Value =
            serde_json::from_str(row.json_data.as_deref().unwrap()).unwrap();
        let failures = extras["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0]["message"], "first");
        assert_eq!(failures[1]["message"], "second");
    }

    #[tokio::test]
    async fn test_approver_chain_appends_in_order() {
        let store = store(None);
        for alias in ["alice", "bob"] {
            store
                .append_chain_entry(
                    "PO-1",
                    ApproverChainEntry {
                        alias: alias.into(),
                        action: "Approve".into(),
                        action_date: chrono::Utc::now(),
                        kind: Some("User".into()),
                        justification: None,
                    },
                )
                .await
                .unwrap();
        }
        let chain = store.approver_chain("PO-1").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].alias, "alice");
        assert_eq!(chain[1].alias, "bob");
    }
}
