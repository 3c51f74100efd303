use serde::{Deserialize, Serialize};

/// Immutable business identity of a document under approval.
///
/// Storage keys are derived from this; tenants that surface a
/// human-readable number key their rows on `display_document_number`
/// instead of `document_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalIdentifier {
    pub document_number: String,
    pub display_document_number: String,
    #[serde(default)]
    pub fiscal_year: Option<String>,
}

impl ApprovalIdentifier {
    pub fn new(document_number: impl Into<String>) -> Self {
        let document_number = document_number.into();
        Self {
            display_document_number: document_number.clone(),
            document_number,
            fiscal_year: None,
        }
    }

    /// The key used for detail-row partitions and blob names.
    pub fn document_key(&self, use_display_document_number: bool) -> &str {
        if use_display_document_number {
            &self.display_document_number
        } else {
            &self.document_number
        }
    }
}
