use serde::{Deserialize, Serialize};

/// Reserved detail row keys.
pub mod row_keys {
    /// Ordered list of aliases currently able to act on the document.
    pub const CURRENT_APPROVER: &str = "CurrentApprover";
    /// Snapshot of the summary rows written at Create time, kept for
    /// audit/recovery.
    pub const SUMMARY_OPERATION: &str = "SummaryOperationType";
    /// The approver chain, one row for the whole ordered audit trail.
    pub const APPROVAL_CHAIN: &str = "ApprovalChainOperation";
    /// Append-only operational extras: folded failure messages, attachment
    /// manifest.
    pub const ADDITIONAL_DETAILS: &str = "AdditionalDetails";
    /// Per-approver transaction payloads.
    pub const TRANSACTION_DETAILS_PREFIX: &str = "TransactionDetails";

    pub fn transaction_details(approver: &str) -> String {
        format!("{}|{}", TRANSACTION_DETAILS_PREFIX, approver.to_lowercase())
    }
}

/// Rows that survive the delete phase of an Update: the next Create phase
/// extends them instead of starting over.
pub fn is_protected_on_update(row_key: &str) -> bool {
    matches!(
        row_key,
        row_keys::CURRENT_APPROVER | row_keys::SUMMARY_OPERATION | row_keys::APPROVAL_CHAIN
    )
}

/// Per-document, per-operation payload row.
///
/// Exactly one of `json_data` / `blob_pointer` carries live data: a row
/// whose payload exceeded the store's inline limit holds only a pointer to
/// the overflow blob, and the blob lives until the row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailsEntity {
    /// Partition key: the tenant-selected document key.
    pub document_key: String,
    /// Operation name or one of the [`row_keys`] sentinels.
    pub row_key: String,
    #[serde(default)]
    pub json_data: Option<String>,
    #[serde(default)]
    pub blob_pointer: Option<String>,
}

impl DetailsEntity {
    pub fn inline(
        document_key: impl Into<String>,
        row_key: impl Into<String>,
        json_data: String,
    ) -> Self {
        Self {
            document_key: document_key.into(),
            row_key: row_key.into(),
            json_data: Some(json_data),
            blob_pointer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_protection_covers_sentinels() {
        assert!(is_protected_on_update(row_keys::CURRENT_APPROVER));
        assert!(is_protected_on_update(row_keys::SUMMARY_OPERATION));
        assert!(is_protected_on_update(row_keys::APPROVAL_CHAIN));
        assert!(!is_protected_on_update(row_keys::ADDITIONAL_DETAILS));
        assert!(!is_protected_on_update("LineItems"));
        assert!(!is_protected_on_update(&row_keys::transaction_details(
            "alice"
        )));
    }
}
