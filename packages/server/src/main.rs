use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use common::LanguageRegistry;
use common::cache::MemoryCacheStore;
use common::storage::{FilesystemObjectStore, ObjectStore};
use judger::JudgeWorker;
use judger::sandbox::isolate::IsolateSandbox;
use mq::{Broker, declare_judging_queues};
use tracing::{Level, error, info};

use server::{AppConfig, AppState, consumers, database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = database::init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    let broker = Broker::new();
    declare_judging_queues(&broker, &config.queues);

    let storage: Arc<dyn ObjectStore> = Arc::new(
        FilesystemObjectStore::new(
            PathBuf::from(&config.storage.base_dir),
            config.storage.max_object_size,
        )
        .await
        .context("Failed to initialize object storage")?,
    );

    let state = AppState::new(
        db,
        broker.clone(),
        Arc::clone(&storage),
        Arc::new(MemoryCacheStore::new()),
        config.queues.clone(),
    );

    let sandbox = Arc::new(IsolateSandbox::new(&config.judger));
    let worker = Arc::new(JudgeWorker::new(
        config.judger.clone(),
        sandbox,
        storage,
        Arc::new(LanguageRegistry::builtin()),
    ));
    {
        let broker = broker.clone();
        let queues = config.queues.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.run(broker, queues).await {
                error!(error = %e, "Judge worker stopped unexpectedly");
            }
        });
    }

    spawn_consumer("judge result", consumers::run_judge_result_consumer(state.clone()));
    spawn_consumer("dead task", consumers::run_dead_task_consumer(state.clone()));
    spawn_consumer("dead result", consumers::run_dead_result_consumer(state.clone()));

    info!("Judging pipeline running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}

fn spawn_consumer(
    name: &'static str,
    fut: impl Future<Output = server::Result<()>> + Send + 'static,
) {
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!(consumer = name, error = %e, "Consumer stopped unexpectedly");
        }
    });
}
