use common::mq::MessageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}
