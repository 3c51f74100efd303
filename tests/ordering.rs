//! Convergence under reordered and replayed delivery: business time wins,
//! replays are no-ops, and the delete-before-create race resolves without
//! destroying newer state.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use arx_pipeline::models::{row_keys, Operation};
use arx_pipeline::queue::Topic;
use arx_pipeline::store::RowDeletionResult;
use arx_pipeline::tenant::{StaticTenant, TenantAdapter, TenantConfig};

use common::{create_request, ctx, delete_request, pipeline, tenant};

#[tokio::test]
async fn test_stale_delete_leaves_newer_state_untouched() {
    let p = pipeline();
    let tenant = tenant(serde_json::json!({}));
    let cfg = TenantConfig::demo("t1");
    let t = Utc::now();

    let mut create = create_request("PO-1", &["alice"], t);
    p.processor.process(&tenant, &mut create, &ctx()).await;

    // a delete that was issued before the create, delivered after it
    let mut stale = delete_request("PO-1", "alice", t - Duration::seconds(1));
    let report = p.processor.process(&tenant, &mut stale, &ctx()).await;

    assert!(report.outcome.is_success());
    assert_eq!(
        report.deletion,
        Some(RowDeletionResult::SkippedDueToRaceCondition)
    );

    // the row survived and nothing was audited or announced for the skip
    assert!(p
        .summaries
        .get_by_document_and_approver(&cfg, "PO-1", "alice")
        .await
        .unwrap()
        .is_some());
    assert!(p.history.list("PO-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replayed_create_converges_to_one_row() {
    let p = pipeline();
    let tenant = tenant(serde_json::json!({}));
    let cfg = TenantConfig::demo("t1");
    let t = Utc::now();

    let mut first = create_request("PO-2", &["alice"], t);
    p.processor.process(&tenant, &mut first, &ctx()).await;

    // at-least-once delivery: the identical message arrives again
    let mut replay = create_request("PO-2", &["alice"], t);
    let report = p.processor.process(&tenant, &mut replay, &ctx()).await;
    assert!(report.outcome.is_success());

    assert_eq!(p.summaries.get_counts_by_approver("alice").await.unwrap(), 1);
    let stored = p
        .summaries
        .get_by_document_and_approver(&cfg, "PO-2", "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.operation_date_time, t);
}

#[tokio::test]
async fn test_delete_before_create_waits_then_refetches_then_skips() {
    let p = pipeline();
    let adapter = Arc::new(StaticTenant::new(TenantConfig::demo("t1")));
    let tenant: Arc<dyn TenantAdapter> = Arc::clone(&adapter) as _;

    // nothing was ever created for this document
    let mut delete = delete_request("PO-3", "alice", Utc::now());
    let started = std::time::Instant::now();
    let report = p.processor.process(&tenant, &mut delete, &ctx()).await;

    assert!(report.outcome.is_success());
    assert_eq!(
        report.deletion,
        Some(RowDeletionResult::SkippedDueToNonExistence)
    );
    // both bounded waits ran before giving up
    assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    // and the line-of-business refetch happened exactly once
    assert_eq!(adapter.summary_fetch_count(), 1);
}

#[tokio::test]
async fn test_stale_update_leaves_snapshot_and_approvers_untouched() {
    let p = pipeline();
    let tenant = tenant(serde_json::json!({}));
    let cfg = TenantConfig::demo("t1");
    let t = Utc::now();

    let mut create = create_request("PO-6", &["alice"], t + Duration::seconds(10));
    p.processor.process(&tenant, &mut create, &ctx()).await;

    // an update issued before the create, delivered after it
    let mut stale = create_request("PO-6", &["bob"], t);
    stale.operation = Operation::Update;
    let report = p.processor.process(&tenant, &mut stale, &ctx()).await;
    assert!(report.outcome.is_success());

    // the newer summary row stands and bob never materialized
    assert!(p
        .summaries
        .get_by_document_and_approver(&cfg, "PO-6", "alice")
        .await
        .unwrap()
        .is_some());
    assert!(p
        .summaries
        .get_by_document_and_approver(&cfg, "PO-6", "bob")
        .await
        .unwrap()
        .is_none());

    // the create phase never ran: snapshot and approver set still reflect
    // the newer write
    assert_eq!(
        p.details.current_approvers("PO-6").await.unwrap(),
        Some(vec!["alice".to_string()])
    );
    let snapshot = p
        .details
        .get_by_operation("PO-6", row_keys::SUMMARY_OPERATION)
        .await
        .unwrap()
        .unwrap()
        .json_data
        .unwrap();
    assert!(snapshot.contains("alice"));
    assert!(!snapshot.contains("bob"));
    assert!(!stale.progress.create_complete);
}

#[tokio::test]
async fn test_replayed_delete_records_history_once() {
    let p = pipeline();
    let tenant = tenant(serde_json::json!({}));
    let t = Utc::now();

    let mut create = create_request("PO-4", &["alice"], t);
    p.processor.process(&tenant, &mut create, &ctx()).await;

    let mut delete = delete_request("PO-4", "alice", t + Duration::seconds(10));
    p.processor.process(&tenant, &mut delete, &ctx()).await;

    let mut replay = delete_request("PO-4", "alice", t + Duration::seconds(10));
    let report = p.processor.process(&tenant, &mut replay, &ctx()).await;
    assert!(report.outcome.is_success());

    assert_eq!(p.history.list("PO-4").await.unwrap().len(), 1);
    assert_eq!(p.details.approver_chain("PO-4").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_newer_create_wins_regardless_of_arrival_order() {
    let p = pipeline();
    let tenant = tenant(serde_json::json!({}));
    let cfg = TenantConfig::demo("t1");
    let t = Utc::now();

    // the newer write lands first
    let mut newer = create_request("PO-5", &["alice"], t + Duration::seconds(20));
    newer.summary_data.as_mut().unwrap()[0].summary_json = serde_json::json!({"title": "newer"});
    p.processor.process(&tenant, &mut newer, &ctx()).await;

    // then the older one straggles in
    let mut older = create_request("PO-5", &["alice"], t);
    older.summary_data.as_mut().unwrap()[0].summary_json = serde_json::json!({"title": "older"});
    let report = p.processor.process(&tenant, &mut older, &ctx()).await;
    assert!(report.outcome.is_success());

    let stored = p
        .summaries
        .get_by_document_and_approver(&cfg, "PO-5", "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.summary_json["title"], "newer");

    // same notifications either way: each processed message announces
    assert_eq!(p.queue.ready_len(Topic::Notification), 2);
}
