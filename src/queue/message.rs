use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::blob::{containers, BlobStore};

/// User-settable message property names.
pub mod properties {
    pub const APPLICATION_ID: &str = "application-id";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CREATED_DATE: &str = "created-date";
    pub const CORRELATION_ID: &str = "correlation-id";
    /// Set when the body is a blob pointer rather than the payload itself.
    pub const IS_BLOB_POINTER: &str = "is-blob-pointer";
    pub const IS_NOTIFICATION_DETAILS: &str = "is-notification-details";
    pub const VERSION: &str = "version";
    pub const ATTEMPT: &str = "attempt";
}

/// A message as it travels on a topic: body plus user properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body: body.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Correlation id for downstream notifications; falls back to the
    /// message id when the producer set none.
    pub fn correlation_id(&self) -> &str {
        self.property(properties::CORRELATION_ID)
            .unwrap_or(&self.message_id)
    }

    pub fn is_blob_pointer(&self) -> bool {
        self.property(properties::IS_BLOB_POINTER) == Some("true")
    }
}

/// Wrap a payload into a message, staging it in blob storage when it
/// exceeds `threshold` bytes so only a pointer travels on the wire.
pub async fn stage_body(
    blob: &BlobStore,
    body: String,
    threshold: usize,
) -> Result<QueueMessage> {
    if body.len() <= threshold {
        return Ok(QueueMessage::new(body));
    }

    let blob_id = Uuid::new_v4().to_string();
    blob.put_compressed(containers::PRIMARY_MESSAGE, &blob_id, &body)
        .await?;
    tracing::debug!(blob_id = %blob_id, bytes = body.len(), "message body staged to blob");
    Ok(QueueMessage::new(blob_id).with_property(properties::IS_BLOB_POINTER, "true"))
}

/// Resolve a message body, fetching the staged blob when the message is
/// pointer-only. Returns the body and the staged blob id, if any.
pub async fn resolve_body(
    blob: &BlobStore,
    message: &QueueMessage,
) -> Result<(String, Option<String>)> {
    if message.is_blob_pointer() {
        let body = blob
            .get_compressed(containers::PRIMARY_MESSAGE, &message.body)
            .await?;
        Ok((body, Some(message.body.clone())))
    } else {
        Ok((message.body.clone(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_body_travels_inline() {
        let blob = BlobStore::memory();
        let msg = stage_body(&blob, "{}".into(), 1024).await.unwrap();
        assert!(!msg.is_blob_pointer());

        let (body, staged) = resolve_body(&blob, &msg).await.unwrap();
        assert_eq!(body, "{}");
        assert!(staged.is_none());
    }

    #[tokio::test]
    async fn test_large_body_round_trips_through_blob() {
        let blob = BlobStore::memory();
        let payload = format!("{{\"big\":\"{}\"}}", "y".repeat(5000));
        let msg = stage_body(&blob, payload.clone(), 1024).await.unwrap();
        assert!(msg.is_blob_pointer());
        assert_ne!(msg.body, payload);

        let (body, staged) = resolve_body(&blob, &msg).await.unwrap();
        assert_eq!(body, payload);
        assert_eq!(staged.as_deref(), Some(msg.body.as_str()));
    }

    #[test]
    fn test_correlation_id_falls_back_to_message_id() {
        let msg = QueueMessage::new("x");
        assert_eq!(msg.correlation_id(), msg.message_id);

        let msg = msg.with_property(properties::CORRELATION_ID, "corr-7");
        assert_eq!(msg.correlation_id(), "corr-7");
    }
}
