//! Tenant adapter boundary.
//!
//! Everything tenant-specific (fetching summaries and details from the
//! line-of-business system, request rewrites, processing knobs) sits
//! behind [`TenantAdapter`]. The pipeline resolves an adapter per message
//! via [`TenantRegistry`] keyed on the `application-id` message property.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::models::{ApprovalIdentifier, CanonicalRequest, SummaryRow};

/// Per-tenant processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Application id; matches the `application-id` message property.
    pub id: String,
    pub name: String,
    pub document_type_id: String,
    /// Key detail rows and blobs on the display document number instead of
    /// the internal one.
    pub use_display_document_number: bool,
    /// Last-writer-wins ordering on business time plus the
    /// delete-before-create wait loop.
    pub race_condition_handling: bool,
    /// Run detail prefetch/attachments/notification synchronously inside
    /// Create instead of on the deferred best-effort path.
    pub sync_detail_prefetch: bool,
    /// Detail operation names to prefetch on Create.
    pub detail_operations: Vec<String>,
    /// Attempts per detail operation prefetch.
    pub detail_fetch_retries: u32,
    /// Bounded waits before falling back to a tenant refetch when a Delete
    /// finds no summary rows.
    pub race_retry_budget: u32,
    pub race_retry_delay_ms: u64,
    pub notification_enabled: bool,
    pub download_attachments: bool,
}

impl TenantConfig {
    /// A reasonable everything-on configuration for tests and the demo
    /// binary.
    pub fn demo(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("tenant {}", id),
            document_type_id: "dt".into(),
            use_display_document_number: false,
            race_condition_handling: true,
            sync_detail_prefetch: true,
            detail_operations: vec!["DT1".into()],
            detail_fetch_retries: 3,
            race_retry_budget: 2,
            race_retry_delay_ms: 50,
            notification_enabled: true,
            download_attachments: false,
        }
    }
}

/// A document attachment fetched from the tenant.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait TenantAdapter: Send + Sync {
    fn config(&self) -> &TenantConfig;

    /// Fetch summary rows from the line-of-business system.
    async fn fetch_summary(
        &self,
        identifier: &ApprovalIdentifier,
    ) -> anyhow::Result<Vec<SummaryRow>>;

    /// Fetch one detail operation payload.
    async fn fetch_details(
        &self,
        identifier: &ApprovalIdentifier,
        operation: &str,
    ) -> anyhow::Result<serde_json::Value>;

    async fn fetch_attachments(
        &self,
        _identifier: &ApprovalIdentifier,
    ) -> anyhow::Result<Vec<Attachment>> {
        Ok(Vec::new())
    }

    /// Tenant-specific request rewrite applied before processing.
    fn modify_request(&self, _request: &mut CanonicalRequest) {}
}

/// Adapter lookup keyed on application id.
#[derive(Default)]
pub struct TenantRegistry {
    adapters: HashMap<String, Arc<dyn TenantAdapter>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn TenantAdapter>) {
        self.adapters
            .insert(adapter.config().id.clone(), adapter);
    }

    pub fn resolve(&self, application_id: &str) -> Option<Arc<dyn TenantAdapter>> {
        self.adapters.get(application_id).cloned()
    }
}

/// Canned adapter serving fixture data, used by tests and the demo binary.
pub struct StaticTenant {
    config: TenantConfig,
    summaries: DashMap<String, Vec<SummaryRow>>,
    details: DashMap<String, serde_json::Value>,
    attachments: DashMap<String, Vec<Attachment>>,
    summary_fetches: AtomicUsize,
    fail_summary_fetch: bool,
    fail_detail_fetch: bool,
}

impl StaticTenant {
    pub fn new(config: TenantConfig) -> Self {
        Self {
            config,
            summaries: DashMap::new(),
            details: DashMap::new(),
            attachments: DashMap::new(),
            summary_fetches: AtomicUsize::new(0),
            fail_summary_fetch: false,
            fail_detail_fetch: false,
        }
    }

    pub fn with_summary(self, document_number: &str, rows: Vec<SummaryRow>) -> Self {
        self.summaries.insert(document_number.to_string(), rows);
        self
    }

    pub fn with_detail(self, operation: &str, payload: serde_json::Value) -> Self {
        self.details.insert(operation.to_string(), payload);
        self
    }

    pub fn with_attachments(self, document_number: &str, attachments: Vec<Attachment>) -> Self {
        self.attachments
            .insert(document_number.to_string(), attachments);
        self
    }

    pub fn failing_summary_fetch(mut self) -> Self {
        self.fail_summary_fetch = true;
        self
    }

    pub fn failing_detail_fetch(mut self) -> Self {
        self.fail_detail_fetch = true;
        self
    }

    /// How many times the line-of-business summary fetch ran.
    pub fn summary_fetch_count(&self) -> usize {
        self.summary_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantAdapter for StaticTenant {
    fn config(&self) -> &TenantConfig {
        &self.config
    }

    async fn fetch_summary(
        &self,
        identifier: &ApprovalIdentifier,
    ) -> anyhow::Result<Vec<SummaryRow>> {
        self.summary_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_summary_fetch {
            anyhow::bail!("line-of-business summary endpoint unavailable");
        }
        Ok(self
            .summaries
            .get(&identifier.document_number)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn fetch_details(
        &self,
        _identifier: &ApprovalIdentifier,
        operation: &str,
    ) -> anyhow::Result<serde_json::Value> {
        if self.fail_detail_fetch {
            anyhow::bail!("detail operation {} unavailable", operation);
        }
        self.details
            .get(operation)
            .map(|v| v.clone())
            .ok_or_else(|| anyhow::anyhow!("no fixture for detail operation {}", operation))
    }

    async fn fetch_attachments(
        &self,
        identifier: &ApprovalIdentifier,
    ) -> anyhow::Result<Vec<Attachment>> {
        Ok(self
            .attachments
            .get(&identifier.document_number)
            .map(|a| a.clone())
            .unwrap_or_default())
    }
}
