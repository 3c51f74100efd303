//! HistoryStore — append-only transactional history.
//!
//! The idempotence tuple (approver, second-truncated action date, action)
//! is encoded into the row key, so "was this action already recorded" is a
//! point lookup and a replayed insert lands on a conflict, which counts as
//! already-inserted.

use std::sync::Arc;

use anyhow::Context;

use crate::errors::PipelineError;
use crate::models::TransactionHistory;

use super::kv::{KeyValueStore, KvError, KvRow};

const HISTORY_TABLE: &str = "history";

pub struct HistoryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl HistoryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// True when a record with the same idempotence tuple already exists.
    pub async fn check_if_inserted(
        &self,
        record: &TransactionHistory,
    ) -> Result<bool, PipelineError> {
        let existing = self
            .kv
            .get(HISTORY_TABLE, &record.document_number, &record.dedup_key())
            .await?;
        Ok(existing.is_some())
    }

    /// Insert a record; returns false (without error) when an identical
    /// record was already there.
    pub async fn insert(&self, record: &TransactionHistory) -> Result<bool, PipelineError> {
        let row = KvRow::new(
            &record.document_number,
            record.dedup_key(),
            serde_json::to_value(record).context("history record serializes")?,
        );
        match self.kv.insert(HISTORY_TABLE, row).await {
            Ok(()) => Ok(true),
            Err(KvError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Full history of a document, oldest action first.
    pub async fn list(&self, document_number: &str) -> Result<Vec<TransactionHistory>, PipelineError> {
        let rows = self
            .kv
            .query_partition(HISTORY_TABLE, document_number)
            .await?;
        let mut records: Vec<TransactionHistory> = rows
            .into_iter()
            .map(|r| {
                serde_json::from_value(r.data)
                    .context("history record deserializes")
                    .map_err(PipelineError::from)
            })
            .collect::<Result<_, _>>()?;
        records.sort_by_key(|r| r.action_date);
        Ok(records)
    }
}
