//! Per-document advisory lock.
//!
//! At most one processor works on a document at a time. The lock is a
//! lease row in a dedicated keyspace: holder uuid plus an expiry, so a
//! crashed holder's lease goes stale and is stolen by the next acquirer
//! instead of wedging the document forever. Acquisition polls with
//! jittered backoff; past the configured wait ceiling the acquirer takes
//! the lease over (the lock is advisory, not a fencing primitive).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kv::{KeyValueStore, KvError, KvRow};

const LOCK_TABLE: &str = "inflight-documents";

#[derive(Debug, Clone)]
pub struct DocumentLockOptions {
    /// Lease lifetime; a holder that dies stops blocking after this.
    pub ttl: Duration,
    /// Base interval between acquisition polls.
    pub poll_interval: Duration,
    /// Total wait ceiling before the lease is taken over.
    pub max_wait: Duration,
}

impl Default for DocumentLockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            max_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Lease {
    holder: Uuid,
    expires_at: DateTime<Utc>,
}

/// Proof of acquisition; must be passed back to [`DocumentLock::release`].
#[derive(Debug)]
pub struct LockGuard {
    pub document_key: String,
    holder: Uuid,
}

pub struct DocumentLock {
    kv: Arc<dyn KeyValueStore>,
    opts: DocumentLockOptions,
}

impl DocumentLock {
    pub fn new(kv: Arc<dyn KeyValueStore>, opts: DocumentLockOptions) -> Self {
        Self { kv, opts }
    }

    /// Acquire the lease for a document, waiting out a live holder up to
    /// the configured ceiling.
    pub async fn acquire(&self, document_key: &str) -> Result<LockGuard, KvError> {
        let holder = Uuid::new_v4();
        let mut waited = Duration::ZERO;

        loop {
            match self.try_take(document_key, holder).await? {
                true => {
                    tracing::debug!(document = document_key, holder = %holder, "document lock acquired");
                    return Ok(LockGuard {
                        document_key: document_key.to_string(),
                        holder,
                    });
                }
                false if waited >= self.opts.max_wait => {
                    tracing::warn!(
                        document = document_key,
                        waited_ms = waited.as_millis() as u64,
                        "lock wait ceiling reached, taking over the lease"
                    );
                    self.write_lease(document_key, holder).await?;
                    return Ok(LockGuard {
                        document_key: document_key.to_string(),
                        holder,
                    });
                }
                false => {
                    let jitter_ms = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(0..=self.opts.poll_interval.as_millis() as u64 / 2)
                    };
                    let pause = self.opts.poll_interval + Duration::from_millis(jitter_ms);
                    tokio::time::sleep(pause).await;
                    waited += pause;
                }
            }
        }
    }

    /// Release the lease; a no-op when someone else already took it over.
    pub async fn release(&self, guard: LockGuard) -> Result<(), KvError> {
        let current = self
            .kv
            .get(LOCK_TABLE, &guard.document_key, "lease")
            .await?;
        if let Some(row) = current {
            if let Ok(lease) = serde_json::from_value::<Lease>(row.data) {
                if lease.holder == guard.holder {
                    self.kv
                        .delete(LOCK_TABLE, &guard.document_key, "lease")
                        .await?;
                    tracing::debug!(document = %guard.document_key, "document lock released");
                } else {
                    tracing::warn!(
                        document = %guard.document_key,
                        "lease was taken over by another holder, leaving it in place"
                    );
                }
            }
        }
        Ok(())
    }

    /// Take the lease if free or expired. Returns false when a live holder
    /// has it or a concurrent acquirer won the slot.
    async fn try_take(&self, document_key: &str, holder: Uuid) -> Result<bool, KvError> {
        // free case: the conditional insert is the acquisition
        match self
            .kv
            .insert(LOCK_TABLE, self.lease_row(document_key, holder))
            .await
        {
            Ok(()) => return Ok(true),
            Err(KvError::Conflict { .. }) => {}
            Err(e) => return Err(e),
        }

        let Some(current) = self.kv.get(LOCK_TABLE, document_key, "lease").await? else {
            // released between the insert and the read; the next poll retries
            return Ok(false);
        };
        if let Ok(lease) = serde_json::from_value::<Lease>(current.data.clone()) {
            if lease.expires_at > Utc::now() {
                return Ok(false);
            }
            tracing::debug!(
                document = document_key,
                stale_holder = %lease.holder,
                "stealing expired lease"
            );
        }

        // steal guarded by the row's write timestamp: a rival steal or a
        // refresh that landed since the read makes this lose cleanly
        match self
            .kv
            .replace_if(
                LOCK_TABLE,
                self.lease_row(document_key, holder),
                current.updated_at,
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(KvError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn lease_row(&self, document_key: &str, holder: Uuid) -> KvRow {
        let ttl = chrono::Duration::from_std(self.opts.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let lease = Lease {
            holder,
            expires_at: Utc::now() + ttl,
        };
        KvRow::new(
            document_key,
            "lease",
            serde_json::to_value(&lease).expect("lease serializes"),
        )
    }

    /// Unconditional lease write, only for the wait-ceiling takeover.
    async fn write_lease(&self, document_key: &str, holder: Uuid) -> Result<(), KvError> {
        self.kv
            .upsert(LOCK_TABLE, self.lease_row(document_key, holder))
            .await
    }
}
