use std::sync::Arc;

use common::LanguageRegistry;
use common::cache::{Cache, CacheStore};
use common::config::QueueNames;
use common::storage::ObjectStore;
use mq::Broker;
use sea_orm::DatabaseConnection;

/// Shared state handed to services and consumers.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub broker: Broker,
    pub storage: Arc<dyn ObjectStore>,
    pub cache: Arc<Cache>,
    pub registry: Arc<LanguageRegistry>,
    pub queues: QueueNames,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        broker: Broker,
        storage: Arc<dyn ObjectStore>,
        cache_store: Arc<dyn CacheStore>,
        queues: QueueNames,
    ) -> Self {
        Self {
            db,
            broker,
            storage,
            cache: Arc::new(Cache::new(cache_store)),
            registry: Arc::new(LanguageRegistry::builtin()),
            queues,
        }
    }
}
