use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::ApprovalIdentifier;
use super::summary::SummaryRow;

/// The operation carried by a canonical request.
///
/// An unrecognized discriminant deserializes to `Unknown` so the processor
/// can report it as a defect signal instead of failing the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// Per-side-effect resume state carried (and serialized) with the request.
///
/// Each pipeline step checks its own flag before re-executing, so a message
/// replayed after a partial failure skips completed side effects.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub create_complete: bool,
    #[serde(default)]
    pub delete_complete: bool,
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default)]
    pub history_logged: bool,
    #[serde(default)]
    pub attachments_downloaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approver {
    pub alias: String,
}

/// Terminal action metadata attached to Delete requests, used for the
/// transaction-history record and the approver chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDetail {
    pub action_by: String,
    pub name: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub approvers_note: Option<String>,
}

/// Correlation vectors threaded through logs for cross-service tracing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub xcv: String,
    #[serde(default)]
    pub tcv: String,
    #[serde(default)]
    pub business_process_name: String,
}

/// The canonical approval-request payload (ARX).
///
/// One inbound message carries one or more of these; see
/// [`parse_requests`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub operation: Operation,
    pub identifier: ApprovalIdentifier,
    #[serde(default)]
    pub approvers: Vec<Approver>,
    /// Explicit list of aliases to remove on Delete; overrides the
    /// current-approver record when present.
    #[serde(default)]
    pub delete_for: Option<Vec<String>>,
    /// Pre-attached summary payload; when absent the tenant adapter is
    /// asked to fetch one.
    #[serde(default)]
    pub summary_data: Option<Vec<SummaryRow>>,
    /// operation-name -> opaque JSON detail payloads attached to the message.
    #[serde(default)]
    pub details_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub action_detail: Option<ActionDetail>,
    /// Business time of the operation; authoritative for ordering.
    pub operation_date_time: DateTime<Utc>,
    #[serde(default)]
    pub telemetry: Telemetry,
    #[serde(default)]
    pub progress: Progress,
}

impl CanonicalRequest {
    pub fn new(operation: Operation, identifier: ApprovalIdentifier) -> Self {
        Self {
            operation,
            identifier,
            approvers: Vec::new(),
            delete_for: None,
            summary_data: None,
            details_data: BTreeMap::new(),
            action_detail: None,
            operation_date_time: Utc::now(),
            telemetry: Telemetry::default(),
            progress: Progress::default(),
        }
    }

    /// Structural validation. Failures are not transient: the request is
    /// dropped from processing and the message still counts as handled.
    pub fn validate(&self) -> Result<(), String> {
        if self.identifier.document_number.trim().is_empty() {
            return Err("document number is empty".into());
        }
        if matches!(self.operation, Operation::Create | Operation::Update)
            && self.approvers.is_empty()
            && self.summary_data.as_ref().map_or(true, |s| s.is_empty())
        {
            return Err("create/update carries neither approvers nor summary data".into());
        }
        if self.approvers.iter().any(|a| a.alias.trim().is_empty()) {
            return Err("approver list contains an empty alias".into());
        }
        Ok(())
    }
}

/// Deserialize one-or-many canonical requests from a message body.
///
/// A single message may fan out to multiple documents, so both a bare
/// object and an array are accepted.
pub fn parse_requests(body: &str) -> Result<Vec<CanonicalRequest>, serde_json::Error> {
    match serde_json::from_str::<Vec<CanonicalRequest>>(body) {
        Ok(many) => Ok(many),
        Err(_) => serde_json::from_str::<CanonicalRequest>(body).map(|one| vec![one]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(op: Operation) -> CanonicalRequest {
        let mut req = CanonicalRequest::new(op, ApprovalIdentifier::new("PO-100"));
        req.approvers = vec![Approver {
            alias: "alice".into(),
        }];
        req
    }

    #[test]
    fn test_unknown_operation_discriminant() {
        let op: Operation = serde_json::from_str("\"frobnicate\"").unwrap();
        assert_eq!(op, Operation::Unknown);
    }

    #[test]
    fn test_validate_rejects_empty_document() {
        let mut req = request(Operation::Create);
        req.identifier.document_number = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_requires_approvers_or_summary_on_create() {
        let mut req = request(Operation::Create);
        req.approvers.clear();
        assert!(req.validate().is_err());

        // a delete without approvers is fine
        let mut del = request(Operation::Delete);
        del.approvers.clear();
        assert!(del.validate().is_ok());
    }

    #[test]
    fn test_parse_requests_single_and_array() {
        let one = serde_json::to_string(&request(Operation::Create)).unwrap();
        assert_eq!(parse_requests(&one).unwrap().len(), 1);

        let many =
            serde_json::to_string(&vec![request(Operation::Create), request(Operation::Delete)])
                .unwrap();
        assert_eq!(parse_requests(&many).unwrap().len(), 2);
    }

    #[test]
    fn test_progress_flags_round_trip() {
        let mut req = request(Operation::Update);
        req.progress.create_complete = true;
        req.progress.notification_sent = true;

        let json = serde_json::to_string(&req).unwrap();
        let back: CanonicalRequest = serde_json::from_str(&json).unwrap();
        assert!(back.progress.create_complete);
        assert!(back.progress.notification_sent);
        assert!(!back.progress.history_logged);
    }
}
