use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of a terminal action taken on a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub document_number: String,
    pub approver: String,
    pub action_taken: String,
    pub action_date: DateTime<Utc>,
    #[serde(default)]
    pub json_data: Option<String>,
    #[serde(default)]
    pub approvers_note: Option<String>,
}

impl TransactionHistory {
    /// Idempotence key: no two records may share the same approver,
    /// second-truncated action date and action for a document. Encoded into
    /// the row key so the existence check is a point lookup.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.approver.to_lowercase(),
            self.action_date.format("%Y%m%dT%H%M%SZ"),
            self.action_taken
        )
    }
}

/// One link of the per-document approver chain, appended whenever a
/// terminal action is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverChainEntry {
    pub alias: String,
    pub action: String,
    pub action_date: DateTime<Utc>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dedup_key_truncates_to_the_second() {
        let base = Utc.with_ymd_and_hms(2026, 8, 23, 10, 30, 15).unwrap();
        let a = TransactionHistory {
            document_number: "PO-100".into(),
            approver: "Alice".into(),
            action_taken: "Approve".into(),
            action_date: base + chrono::Duration::milliseconds(250),
            json_data: None,
            approvers_note: None,
        };
        let b = TransactionHistory {
            action_date: base + chrono::Duration::milliseconds(900),
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());

        let later = TransactionHistory {
            action_date: base + chrono::Duration::seconds(1),
            ..a.clone()
        };
        assert_ne!(a.dedup_key(), later.dedup_key());
    }
}
