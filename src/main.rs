use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arx_pipeline::cli::{Cli, Commands};
use arx_pipeline::config::{self, Config};
use arx_pipeline::notification::NotificationDispatcher;
use arx_pipeline::processor::RequestProcessor;
use arx_pipeline::queue::{properties, stage_body, MemoryQueue, MessageQueueClient, Topic};
use arx_pipeline::receiver::{MessageReceiver, ReceiverConfig};
use arx_pipeline::store::{
    BlobStore, DetailStore, DocumentLock, DocumentLockOptions, HistoryStore, KeyValueStore,
    MemoryKv, SummaryStore,
};
use arx_pipeline::tenant::{StaticTenant, TenantConfig, TenantRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "arx_pipeline=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    match args.command {
        Some(Commands::Run {
            inject,
            application_id,
        }) => run(cfg, inject, application_id).await,
        None => run(cfg, None, "demo".into()).await,
    }
}

async fn run(
    cfg: Config,
    inject: Option<std::path::PathBuf>,
    application_id: String,
) -> anyhow::Result<()> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::with_inline_limit(cfg.inline_limit));
    let blob = BlobStore::from_url(&cfg.blob_store_url)
        .with_context(|| format!("opening blob store at {}", cfg.blob_store_url))?;
    let queue: Arc<dyn MessageQueueClient> = Arc::new(MemoryQueue::new(Duration::from_secs(
        cfg.queue_lock_ttl_secs,
    )));

    let details = Arc::new(DetailStore::new(Arc::clone(&kv), blob.clone()));
    let summaries = Arc::new(SummaryStore::new(Arc::clone(&kv), Arc::clone(&details)));
    let history = Arc::new(HistoryStore::new(Arc::clone(&kv)));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        blob.clone(),
        Arc::clone(&queue),
        cfg.notification_version.clone(),
    ));
    let processor = RequestProcessor::new(summaries, details, history, dispatcher, blob.clone());

    let mut tenants = TenantRegistry::new();
    tenants.register(Arc::new(StaticTenant::new(TenantConfig::demo(
        &application_id,
    ))));

    let lock = DocumentLock::new(
        Arc::clone(&kv),
        DocumentLockOptions {
            ttl: Duration::from_secs(cfg.lock_ttl_secs),
            poll_interval: Duration::from_millis(cfg.lock_poll_ms),
            max_wait: Duration::from_millis(cfg.lock_wait_ceiling_ms),
        },
    );

    let receiver = Arc::new(MessageReceiver::new(
        processor,
        Arc::new(tenants),
        Arc::clone(&queue),
        blob.clone(),
        lock,
        ReceiverConfig {
            main_attempt_threshold: cfg.main_attempts,
            stage_threshold_bytes: cfg.stage_threshold,
            poll_idle: Duration::from_millis(cfg.poll_idle_ms),
        },
    ));

    if let Some(path) = inject {
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("reading inject file {}", path.display()))?;
        let message = stage_body(&blob, body, cfg.stage_threshold)
            .await?
            .with_property(properties::APPLICATION_ID, application_id.as_str())
            .with_property(properties::CONTENT_TYPE, "application/json")
            .with_property(properties::CREATED_DATE, Utc::now().to_rfc3339());
        queue
            .send(Topic::Main, message)
            .await
            .context("injecting replay message")?;
        tracing::info!(file = %path.display(), "replay message injected into the main topic");
    }

    let main_worker = tokio::spawn(Arc::clone(&receiver).poll_loop(Topic::Main));
    let retry_worker = tokio::spawn(Arc::clone(&receiver).poll_loop(Topic::Retry));

    tracing::info!("pipeline workers started, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("listening for shutdown")?;
    tracing::info!("shutting down");

    main_worker.abort();
    retry_worker.abort();
    Ok(())
}
