use thiserror::Error;

use crate::sandbox::SandboxError;
use common::storage::StorageError;
use mq::MqError;

#[derive(Debug, Error)]
pub enum JudgerError {
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("MQ error: {0}")]
    Mq(#[from] MqError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
