//! MessageReceiver — ingress for the main and retry topics.
//!
//! Resolves the message body (inline or staged blob), fans out to one or
//! more canonical requests, validates (invalid requests are dropped, not
//! retried), serializes processing per document behind the document lock,
//! and escalates main-lane failures to the retry topic exactly once. The
//! retry lane is a second chance, not a loop: its failures are logged and
//! the message is settled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::models::{parse_requests, CanonicalRequest};
use crate::processor::{MessageContext, OperationOutcome, RequestProcessor};
use crate::queue::{
    properties, resolve_body, stage_body, MessageQueueClient, QueueError, QueueMessage,
    ReceivedMessage, Topic,
};
use crate::store::{BlobStore, DocumentLock};
use crate::tenant::TenantRegistry;

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Starting value of the `attempt` property on main-lane messages.
    pub main_attempt_threshold: u32,
    /// Bodies above this many bytes are staged in blob storage.
    pub stage_threshold_bytes: usize,
    /// Idle pause between polls when a topic is empty.
    pub poll_idle: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            main_attempt_threshold: 2,
            stage_threshold_bytes: 48 * 1024,
            poll_idle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Main,
    Retry,
}

pub struct MessageReceiver {
    processor: RequestProcessor,
    tenants: Arc<TenantRegistry>,
    queue: Arc<dyn MessageQueueClient>,
    blob: BlobStore,
    lock: DocumentLock,
    config: ReceiverConfig,
}

impl MessageReceiver {
    pub fn new(
        processor: RequestProcessor,
        tenants: Arc<TenantRegistry>,
        queue: Arc<dyn MessageQueueClient>,
        blob: BlobStore,
        lock: DocumentLock,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            processor,
            tenants,
            queue,
            blob,
            lock,
            config,
        }
    }

    /// Handle one delivery from the main topic.
    pub async fn on_main_message(&self, received: ReceivedMessage) {
        self.handle(received, Lane::Main).await;
    }

    /// Handle one delivery from the retry topic.
    pub async fn on_retry_message(&self, received: ReceivedMessage) {
        self.handle(received, Lane::Retry).await;
    }

    async fn handle(&self, received: ReceivedMessage, lane: Lane) {
        let message = &received.message;
        let topic = match lane {
            Lane::Main => Topic::Main,
            Lane::Retry => Topic::Retry,
        };

        let (body, staged_blob_id) = match resolve_body(&self.blob, message).await {
            Ok(resolved) => resolved,
            Err(e) => {
                // the staged blob may simply not be visible yet
                warn!(message_id = %message.message_id, error = %e, "failed to resolve message body");
                if lane == Lane::Main {
                    self.escalate_raw(message).await;
                }
                self.settle(topic, &received).await;
                return;
            }
        };

        let requests = match parse_requests(&body) {
            Ok(requests) => requests,
            Err(e) => {
                // malformed payloads never get better on retry
                error!(message_id = %message.message_id, error = %e, "message body failed to deserialize, dropping");
                self.settle(topic, &received).await;
                return;
            }
        };

        let application_id = message
            .property(properties::APPLICATION_ID)
            .unwrap_or_default()
            .to_string();
        let Some(tenant) = self.tenants.resolve(&application_id) else {
            error!(application_id = %application_id, "no tenant adapter registered, dropping message");
            self.settle(topic, &received).await;
            return;
        };

        let mut ctx = MessageContext::new(message.correlation_id());
        ctx.staged_blob_id = staged_blob_id;

        let mut failed: Vec<CanonicalRequest> = Vec::new();
        for mut request in requests {
            if let Err(reason) = request.validate() {
                // validation failures are not transient: drop the request
                warn!(
                    document = %request.identifier.document_number,
                    reason = %reason,
                    "request failed validation, dropped from processing"
                );
                continue;
            }

            let doc_key = request
                .identifier
                .document_key(tenant.config().use_display_document_number)
                .to_string();

            let guard = match self.lock.acquire(&doc_key).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(document = %doc_key, error = %e, "document lock acquisition failed");
                    failed.push(request);
                    continue;
                }
            };

            let report = self.processor.process(&tenant, &mut request, &ctx).await;

            if let Err(e) = self.lock.release(guard).await {
                warn!(document = %doc_key, error = %e, "document lock release failed");
            }

            match report.outcome {
                OperationOutcome::Success => {}
                OperationOutcome::Unknown => {
                    error!(document = %doc_key, "operation fell through without a terminal branch");
                }
                OperationOutcome::Error(e) if e.is_terminal() => {
                    warn!(document = %doc_key, error = %e, "terminal failure, request dropped");
                }
                OperationOutcome::Error(e) => {
                    debug!(document = %doc_key, error = %e, "request failed, queueing for escalation");
                    failed.push(request);
                }
            }
        }

        if !failed.is_empty() {
            match lane {
                Lane::Main => self.escalate(&application_id, message, failed).await,
                Lane::Retry => {
                    // second chance exhausted; log and terminate
                    error!(
                        message_id = %message.message_id,
                        requests = failed.len(),
                        "retry-lane processing failed, message abandoned to logs"
                    );
                }
            }
        }

        self.settle(topic, &received).await;
    }

    /// Republish the failed requests to the retry topic, serialized
    /// fresh so the resume flags travel along, staged in blob when large.
    async fn escalate(
        &self,
        application_id: &str,
        original: &QueueMessage,
        failed: Vec<CanonicalRequest>,
    ) {
        let body = match serde_json::to_string(&failed) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize requests for escalation");
                return;
            }
        };
        let message = match stage_body(&self.blob, body, self.config.stage_threshold_bytes).await {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "failed to stage escalation payload");
                return;
            }
        };

        let attempt: u32 = original
            .property(properties::ATTEMPT)
            .and_then(|a| a.parse().ok())
            .unwrap_or(self.config.main_attempt_threshold);

        let message = message
            .with_property(properties::APPLICATION_ID, application_id)
            .with_property(properties::CORRELATION_ID, original.correlation_id())
            .with_property(properties::CONTENT_TYPE, "application/json")
            .with_property(properties::CREATED_DATE, Utc::now().to_rfc3339())
            .with_property(properties::ATTEMPT, (attempt + 1).to_string());

        match self.queue.send(Topic::Retry, message).await {
            Ok(()) => info!(
                message_id = %original.message_id,
                "message escalated to the retry topic"
            ),
            Err(e) => error!(message_id = %original.message_id, error = %e, "escalation publish failed"),
        }
    }

    /// Escalate a message whose body could not even be resolved: forward
    /// it as-is so the retry lane gets one attempt at the staged blob.
    async fn escalate_raw(&self, original: &QueueMessage) {
        let mut forwarded = original.clone();
        forwarded
            .properties
            .insert(properties::CREATED_DATE.into(), Utc::now().to_rfc3339());
        if let Err(e) = self.queue.send(Topic::Retry, forwarded).await {
            error!(message_id = %original.message_id, error = %e, "raw escalation publish failed");
        }
    }

    async fn settle(&self, topic: Topic, received: &ReceivedMessage) {
        match self.queue.complete(topic, received.lock_token).await {
            Ok(()) => {}
            Err(QueueError::LockLost(_)) => {
                // terminal for this attempt; the transport re-delivers
                warn!(
                    message_id = %received.message.message_id,
                    topic = topic.as_str(),
                    "message lock expired before completion"
                );
            }
            Err(e) => {
                error!(message_id = %received.message.message_id, error = %e, "failed to settle message");
            }
        }
    }

    /// Poll one topic forever, dispatching each delivery to its handler.
    pub async fn poll_loop(self: Arc<Self>, lane_topic: Topic) {
        info!(topic = lane_topic.as_str(), "receiver polling started");
        loop {
            let next = self.queue.receive(lane_topic).await;
            match next {
                Ok(Some(received)) => match lane_topic {
                    Topic::Main => self.on_main_message(received).await,
                    Topic::Retry => self.on_retry_message(received).await,
                    Topic::Notification => {
                        // not ours to consume; put it back
                        let _ = self.queue.abandon(lane_topic, received.lock_token).await;
                        return;
                    }
                },
                Ok(None) => tokio::time::sleep(self.config.poll_idle).await,
                Err(e) => {
                    error!(topic = lane_topic.as_str(), error = %e, "receive failed");
                    tokio::time::sleep(self.config.poll_idle).await;
                }
            }
        }
    }
}
