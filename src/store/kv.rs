//! Generic partition/row-keyed entity store.
//!
//! Stands in for the table-storage dependency: per-row conditional insert,
//! insert-or-replace, point/partition/row-key reads and delete. The
//! in-memory implementation enforces a configurable inline size limit so
//! callers can exercise the blob-overflow path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("row already exists: {partition}/{row}")]
    Conflict { partition: String, row: String },

    #[error("entity exceeds inline size limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A stored row: opaque JSON body plus addressing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvRow {
    pub partition_key: String,
    pub row_key: String,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl KvRow {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            data,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, table: &str, partition: &str, row: &str)
        -> Result<Option<KvRow>, KvError>;

    async fn query_partition(&self, table: &str, partition: &str) -> Result<Vec<KvRow>, KvError>;

    /// Cross-partition scan by row key. Point lookups are preferred; this
    /// exists for the delete fallback that only knows the document.
    async fn query_row_key(&self, table: &str, row: &str) -> Result<Vec<KvRow>, KvError>;

    /// Insert; fails with [`KvError::Conflict`] if the row exists.
    async fn insert(&self, table: &str, row: KvRow) -> Result<(), KvError>;

    /// Insert-or-replace.
    async fn upsert(&self, table: &str, row: KvRow) -> Result<(), KvError>;

    /// Replace an existing row only when its stored `updated_at` still
    /// matches `expected` (optimistic concurrency, the moral equivalent of
    /// an ETag-conditioned write). Fails with [`KvError::Conflict`] when
    /// the row is missing or was written since.
    async fn replace_if(
        &self,
        table: &str,
        row: KvRow,
        expected: DateTime<Utc>,
    ) -> Result<(), KvError>;

    /// Returns whether a row was actually removed.
    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<bool, KvError>;

    /// Inline body size limit, when the backend exposes one ahead of the
    /// write. `None` means only the write attempt can report
    /// [`KvError::PayloadTooLarge`].
    fn inline_limit(&self) -> Option<usize> {
        None
    }
}

type Table = DashMap<(String, String), KvRow>;

/// DashMap-backed store for tests, development and the demo binary.
pub struct MemoryKv {
    tables: DashMap<String, Table>,
    inline_limit: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            inline_limit: None,
        }
    }

    /// Enforce a maximum serialized body size, as real table stores do.
    pub fn with_inline_limit(limit: usize) -> Self {
        Self {
            tables: DashMap::new(),
            inline_limit: Some(limit),
        }
    }

    fn check_size(&self, row: &KvRow) -> Result<(), KvError> {
        if let Some(limit) = self.inline_limit {
            let size = serde_json::to_vec(&row.data).map(|v| v.len()).unwrap_or(0);
            if size > limit {
                return Err(KvError::PayloadTooLarge { limit });
            }
        }
        Ok(())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<KvRow>, KvError> {
        Ok(self.tables.get(table).and_then(|t| {
            t.get(&(partition.to_string(), row.to_string()))
                .map(|r| r.clone())
        }))
    }

    async fn query_partition(&self, table: &str, partition: &str) -> Result<Vec<KvRow>, KvError> {
        let mut rows: Vec<KvRow> = match self.tables.get(table) {
            Some(t) => t
                .iter()
                .filter(|e| e.key().0 == partition)
                .map(|e| e.value().clone())
                .collect(),
            None => Vec::new(),
        };
        rows.sort_by(|a, b| a.row_key.cmp(&b.row_key));
        Ok(rows)
    }

    async fn query_row_key(&self, table: &str, row: &str) -> Result<Vec<KvRow>, KvError> {
        let mut rows: Vec<KvRow> = match self.tables.get(table) {
            Some(t) => t
                .iter()
                .filter(|e| e.key().1 == row)
                .map(|e| e.value().clone())
                .collect(),
            None => Vec::new(),
        };
        rows.sort_by(|a, b| a.partition_key.cmp(&b.partition_key));
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: KvRow) -> Result<(), KvError> {
        self.check_size(&row)?;
        let t = self.tables.entry(table.to_string()).or_default();
        let key = (row.partition_key.clone(), row.row_key.clone());
        let result = match t.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(KvError::Conflict {
                partition: row.partition_key,
                row: row.row_key,
            }),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(row);
                Ok(())
            }
        };
        result
    }

    async fn upsert(&self, table: &str, row: KvRow) -> Result<(), KvError> {
        self.check_size(&row)?;
        let t = self.tables.entry(table.to_string()).or_default();
        t.insert((row.partition_key.clone(), row.row_key.clone()), row);
        Ok(())
    }

    async fn replace_if(
        &self,
        table: &str,
        row: KvRow,
        expected: DateTime<Utc>,
    ) -> Result<(), KvError> {
        self.check_size(&row)?;
        let t = self.tables.entry(table.to_string()).or_default();
        let key = (row.partition_key.clone(), row.row_key.clone());
        let result = match t.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut o) if o.get().updated_at == expected => {
                o.insert(row);
                Ok(())
            }
            _ => Err(KvError::Conflict {
                partition: row.partition_key,
                row: row.row_key,
            }),
        };
        result
    }

    async fn delete(&self, table: &str, partition: &str, row: &str) -> Result<bool, KvError> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.remove(&(partition.to_string(), row.to_string())))
            .is_some())
    }

    fn inline_limit(&self) -> Option<usize> {
        self.inline_limit
    }
}
