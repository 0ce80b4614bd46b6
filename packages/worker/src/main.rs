mod config;
mod error;
mod handlers;

use std::sync::Arc;

use anyhow::Context;
use common::storage::filesystem::FilesystemBlobStore;
use common::{AssetJob, DirectiveDefaults};
use engine::Engine;
use handlers::asset_job::handle_asset_job;
use mq::{BroccoliJobQueue, BrokerMessage, MqConfig, init_mq};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = config::WorkerAppConfig::load().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let mq = Arc::new(
        init_mq(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to initialize MQ")?,
    );
    info!(queue_name = %config.mq.queue_name, "MQ connected");

    let engine = build_engine(&config, Arc::clone(&mq))
        .await
        .context("Failed to initialize engine")?;

    let result = mq
        .process_messages(
            &config.mq.queue_name,
            Some(config.worker.concurrency),
            None,
            move |message: BrokerMessage<AssetJob>| {
                let engine = engine.clone();
                async move { handle_asset_job(&engine, message.payload).await }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}

async fn build_engine(
    config: &config::WorkerAppConfig,
    mq: Arc<mq::Mq>,
) -> error::Result<Engine> {
    let defaults = DirectiveDefaults::new(config.directives.to_directives()?);
    info!(defaults = ?defaults.snapshot(), "Directive defaults loaded");

    let db = engine::database::init_db(&config.database.url, config.database.max_connections)
        .await?;
    info!("Database connected");

    let cache = FilesystemBlobStore::new(
        config.storage.cache_dir.clone(),
        config.storage.max_blob_size,
    )
    .await?;
    let store = FilesystemBlobStore::new(
        config.storage.store_dir.clone(),
        config.storage.max_blob_size,
    )
    .await?;
    let queue = BroccoliJobQueue::new(mq, config.mq.queue_name.clone());

    Ok(Engine::new(db, Arc::new(cache), Arc::new(store), Arc::new(queue))
        .with_defaults(defaults)
        .with_generators(engine::builtin_registry()))
}
