use serde::{Deserialize, Serialize};

use super::identifier::ApprovalIdentifier;
use super::summary::SummaryRow;

/// The staged notification payload. Only a blob pointer travels on the
/// notification topic; consumers hydrate this envelope from blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub tenant_id: String,
    pub tenant_name: String,
    pub identifier: ApprovalIdentifier,
    #[serde(default)]
    pub device_notification_info: Option<serde_json::Value>,
    pub summary_rows: Vec<SummaryRow>,
    #[serde(default)]
    pub additional_data: Option<serde_json::Value>,
    /// False when any detail prefetch failed; consumers fall back to a
    /// summary-only notification.
    pub details_load_success: bool,
}
