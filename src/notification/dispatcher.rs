//! NotificationDispatcher — stages the notification envelope as a blob and
//! republishes a pointer-only message.
//!
//! Publishing is best-effort: up to 3 attempts with no backoff, and
//! exhaustion only clears the request's `notification_sent` flag and logs.
//! It never fails the operation that triggered it.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::models::{CanonicalRequest, NotificationEnvelope, SummaryRow};
use crate::queue::{properties, MessageQueueClient, QueueMessage, Topic};
use crate::store::blob::{containers, BlobStore};
use crate::tenant::TenantConfig;

const PUBLISH_ATTEMPTS: u32 = 3;

pub struct NotificationDispatcher {
    blob: BlobStore,
    queue: Arc<dyn MessageQueueClient>,
    /// Version string stamped on outbound pointer messages.
    version: String,
}

impl NotificationDispatcher {
    pub fn new(blob: BlobStore, queue: Arc<dyn MessageQueueClient>, version: String) -> Self {
        Self {
            blob,
            queue,
            version,
        }
    }

    /// Stage and publish a notification for a processed request.
    ///
    /// `staged_blob_id` is the inbound message's staged blob id, reused as
    /// the envelope's blob name when present; otherwise the name is derived
    /// deterministically from the correlation id and document so replays
    /// stage to the same blob.
    pub async fn dispatch(
        &self,
        tenant: &TenantConfig,
        request: &mut CanonicalRequest,
        summary_rows: &[SummaryRow],
        details_load_success: bool,
        correlation_id: &str,
        staged_blob_id: Option<&str>,
    ) {
        let envelope = NotificationEnvelope {
            tenant_id: tenant.id.clone(),
            tenant_name: tenant.name.clone(),
            identifier: request.identifier.clone(),
            device_notification_info: None,
            summary_rows: summary_rows.to_vec(),
            additional_data: None,
            details_load_success,
        };

        let body = match serde_json::to_string(&envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "notification envelope failed to serialize");
                request.progress.notification_sent = false;
                return;
            }
        };

        let blob_id = staged_blob_id.map(String::from).unwrap_or_else(|| {
            derived_blob_id(correlation_id, &request.identifier.document_number)
        });

        if let Err(e) = self
            .blob
            .put_text(containers::NOTIFICATION, &blob_id, &body)
            .await
        {
            warn!(blob_id = %blob_id, error = %e, "failed to stage notification envelope");
            request.progress.notification_sent = false;
            return;
        }

        let message = QueueMessage::new(blob_id.clone())
            .with_property(properties::APPLICATION_ID, &tenant.id)
            .with_property(properties::CORRELATION_ID, correlation_id)
            .with_property(properties::IS_NOTIFICATION_DETAILS, "true")
            .with_property(properties::VERSION, &self.version);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.queue.send(Topic::Notification, message.clone()).await {
                Ok(()) => {
                    info!(
                        document = %request.identifier.document_number,
                        blob_id = %blob_id,
                        attempt,
                        "notification published"
                    );
                    request.progress.notification_sent = true;
                    return;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "notification publish attempt failed");
                }
            }
        }

        warn!(
            document = %request.identifier.document_number,
            "notification publish exhausted all attempts"
        );
        request.progress.notification_sent = false;
    }
}

/// Deterministic staged-envelope name: same correlation id and document
/// always map to the same blob.
fn derived_blob_id(correlation_id: &str, document_number: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(correlation_id.as_bytes());
    hasher.update(b"|");
    hasher.update(document_number.as_bytes());
    hex::encode(hasher.finalize())
}
