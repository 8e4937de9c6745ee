use common::cache::CacheError;
use common::storage::StorageError;
use mq::MqError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Db(#[from] DbErr),

    #[error("queue error: {0}")]
    Mq(#[from] MqError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
