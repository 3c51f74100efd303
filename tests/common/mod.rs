//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use arx_pipeline::models::{
    ActionDetail, ApprovalIdentifier, Approver, CanonicalRequest, Operation, SummaryRow,
};
use arx_pipeline::notification::NotificationDispatcher;
use arx_pipeline::processor::{MessageContext, RequestProcessor};
use arx_pipeline::queue::MemoryQueue;
use arx_pipeline::store::{
    BlobStore, DetailStore, HistoryStore, KeyValueStore, MemoryKv, SummaryStore,
};
use arx_pipeline::tenant::{StaticTenant, TenantAdapter, TenantConfig};

pub struct Pipeline {
    pub kv: Arc<dyn KeyValueStore>,
    pub blob: BlobStore,
    pub queue: Arc<MemoryQueue>,
    pub summaries: Arc<SummaryStore>,
    pub details: Arc<DetailStore>,
    pub history: Arc<HistoryStore>,
    pub processor: RequestProcessor,
}

pub fn pipeline() -> Pipeline {
    pipeline_with_kv(Arc::new(MemoryKv::new()))
}

pub fn pipeline_with_kv(kv: Arc<dyn KeyValueStore>) -> Pipeline {
    let blob = BlobStore::memory();
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
    let details = Arc::new(DetailStore::new(Arc::clone(&kv), blob.clone()));
    let summaries = Arc::new(SummaryStore::new(Arc::clone(&kv), Arc::clone(&details)));
    let history = Arc::new(HistoryStore::new(Arc::clone(&kv)));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        blob.clone(),
        Arc::clone(&queue) as Arc<dyn arx_pipeline::queue::MessageQueueClient>,
        "1".into(),
    ));
    let processor = RequestProcessor::new(
        Arc::clone(&summaries),
        Arc::clone(&details),
        Arc::clone(&history),
        dispatcher,
        blob.clone(),
    );
    Pipeline {
        kv,
        blob,
        queue,
        summaries,
        details,
        history,
        processor,
    }
}

pub fn tenant(detail_payload: serde_json::Value) -> Arc<dyn TenantAdapter> {
    Arc::new(StaticTenant::new(TenantConfig::demo("t1")).with_detail("DT1", detail_payload))
}

pub fn summary_row(approver: &str, doc: &str, odt: DateTime<Utc>) -> SummaryRow {
    SummaryRow {
        approver: approver.into(),
        document_type_id: "dt".into(),
        identifier: ApprovalIdentifier::new(doc),
        operation_date_time: odt,
        summary_json: serde_json::json!({"title": format!("order {doc}")}),
        last_failed: None,
        lob_pending: false,
        is_offline_approval: false,
        next_reminder_time: None,
    }
}

pub fn create_request(doc: &str, approvers: &[&str], odt: DateTime<Utc>) -> CanonicalRequest {
    let mut req = CanonicalRequest::new(Operation::Create, ApprovalIdentifier::new(doc));
    req.operation_date_time = odt;
    req.approvers = approvers
        .iter()
        .map(|a| Approver {
            alias: (*a).to_string(),
        })
        .collect();
    req.summary_data = Some(
        approvers
            .iter()
            .map(|a| summary_row(a, doc, odt))
            .collect(),
    );
    req
}

pub fn delete_request(doc: &str, actor: &str, odt: DateTime<Utc>) -> CanonicalRequest {
    let mut req = CanonicalRequest::new(Operation::Delete, ApprovalIdentifier::new(doc));
    req.operation_date_time = odt;
    req.action_detail = Some(ActionDetail {
        action_by: actor.into(),
        name: "Approve".into(),
        failure_reason: None,
        approvers_note: None,
    });
    req
}

pub fn ctx() -> MessageContext {
    MessageContext::new("corr-test")
}
