use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::ApprovalIdentifier;

/// The compact per-approver record driving "pending approvals" views.
///
/// Partition key is the lower-cased approver alias; row key is
/// `{document_type_id}|{document_key}` so at most one live row exists per
/// (approver, document) pair and a cross-partition row-key scan finds every
/// approver's row for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub approver: String,
    pub document_type_id: String,
    pub identifier: ApprovalIdentifier,
    /// Business time of the write; authoritative for last-writer-wins.
    pub operation_date_time: DateTime<Utc>,
    pub summary_json: serde_json::Value,
    #[serde(default)]
    pub last_failed: Option<String>,
    #[serde(default)]
    pub lob_pending: bool,
    #[serde(default)]
    pub is_offline_approval: bool,
    #[serde(default)]
    pub next_reminder_time: Option<DateTime<Utc>>,
}

impl SummaryRow {
    pub fn partition_key(&self) -> String {
        self.approver.to_lowercase()
    }

    pub fn row_key(&self, use_display_document_number: bool) -> String {
        format!(
            "{}|{}",
            self.document_type_id,
            self.identifier.document_key(use_display_document_number)
        )
    }

    /// A row is live unless it is parked waiting on the line-of-business
    /// system (offline approvals stay visible regardless).
    pub fn is_live(&self) -> bool {
        !self.lob_pending || self.is_offline_approval
    }
}
