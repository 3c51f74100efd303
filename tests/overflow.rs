//! Blob overflow of oversized detail payloads, end to end through the
//! processor.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use arx_pipeline::store::blob::containers;
use arx_pipeline::store::MemoryKv;

use common::{create_request, ctx, delete_request, pipeline_with_kv, tenant};

fn big_payload() -> serde_json::Value {
    serde_json::json!({"attachment": "z".repeat(5_000)})
}

#[tokio::test]
async fn test_oversized_detail_overflows_and_reads_back_identically() {
    let p = pipeline_with_kv(Arc::new(MemoryKv::with_inline_limit(1024)));
    let tenant = tenant(serde_json::json!({}));

    let mut req = create_request("PO-9", &["alice"], Utc::now());
    req.details_data.insert("DT1".into(), big_payload());
    let report = p.processor.process(&tenant, &mut req, &ctx()).await;
    assert!(report.outcome.is_success());

    // the row carries a pointer; the read hydrates the original bytes
    assert!(p
        .blob
        .exists(containers::DETAILS_OVERFLOW, "PO-9|t1|DT1")
        .await
        .unwrap());
    let row = p
        .details
        .get_by_operation("PO-9", "DT1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.blob_pointer.as_deref(), Some("PO-9|t1|DT1"));
    assert_eq!(row.json_data.as_deref(), Some(big_payload().to_string().as_str()));
}

#[tokio::test]
async fn test_delete_removes_the_overflow_blob() {
    let p = pipeline_with_kv(Arc::new(MemoryKv::with_inline_limit(1024)));
    let tenant = tenant(serde_json::json!({}));
    let t = Utc::now();

    let mut req = create_request("PO-10", &["alice"], t);
    req.details_data.insert("DT1".into(), big_payload());
    p.processor.process(&tenant, &mut req, &ctx()).await;

    let mut delete = delete_request("PO-10", "alice", t + Duration::seconds(5));
    let report = p.processor.process(&tenant, &mut delete, &ctx()).await;
    assert!(report.outcome.is_success());

    assert!(!p
        .blob
        .exists(containers::DETAILS_OVERFLOW, "PO-10|t1|DT1")
        .await
        .unwrap());
    assert!(p
        .details
        .get_by_operation("PO-10", "DT1")
        .await
        .unwrap()
        .is_none());
}
