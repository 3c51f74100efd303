use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Backing blob store, e.g. `memory://`, `file:///var/lib/arx`,
    /// or `s3://bucket?region=us-east-1`.
    pub blob_store_url: String,
    /// Largest serialized row the key-value store accepts inline.
    /// Set via ARX_INLINE_LIMIT. Default: 32768.
    pub inline_limit: usize,
    /// Message bodies above this size are staged in blob storage.
    /// Set via ARX_STAGE_THRESHOLD. Default: 49152.
    pub stage_threshold: usize,
    /// Document lock lease lifetime in seconds.
    pub lock_ttl_secs: u64,
    /// Pause between lock acquisition attempts, in milliseconds.
    pub lock_poll_ms: u64,
    /// How long a waiter tolerates a held lock before taking over, ms.
    pub lock_wait_ceiling_ms: u64,
    /// Queue delivery lock lifetime in seconds.
    pub queue_lock_ttl_secs: u64,
    /// Attempt number stamped on messages escalated off the main topic.
    pub main_attempts: u32,
    /// Version tag carried on notification messages.
    pub notification_version: String,
    /// Idle pause between queue polls when a topic is empty, ms.
    pub poll_idle_ms: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        blob_store_url: std::env::var("ARX_BLOB_STORE_URL")
            .unwrap_or_else(|_| "memory://".into()),
        inline_limit: std::env::var("ARX_INLINE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(32 * 1024),
        stage_threshold: std::env::var("ARX_STAGE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(48 * 1024),
        lock_ttl_secs: std::env::var("ARX_LOCK_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        lock_poll_ms: std::env::var("ARX_LOCK_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(250),
        lock_wait_ceiling_ms: std::env::var("ARX_LOCK_WAIT_CEILING_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000),
        queue_lock_ttl_secs: std::env::var("ARX_QUEUE_LOCK_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        main_attempts: std::env::var("ARX_MAIN_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2),
        notification_version: std::env::var("ARX_NOTIFICATION_VERSION")
            .unwrap_or_else(|_| "1".into()),
        poll_idle_ms: std::env::var("ARX_POLL_IDLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(200),
    })
}
