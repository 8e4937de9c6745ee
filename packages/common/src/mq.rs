use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use thiserror::Error;
use tracing::error;

/// Core trait for all queue messages.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    /// Stable type tag written into the envelope.
    fn message_type() -> &'static str
    where
        Self: Sized;

    /// Correlation id for logging and redelivery tracking.
    fn message_id(&self) -> String;
}

/// Transport envelope: the broker stores these, consumers decode them back
/// into typed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_type: String,
    pub message_id: String,
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    pub fn from_message<M: Message>(message: &M) -> Result<Self, MessageError> {
        Ok(Self {
            message_type: M::message_type().to_string(),
            message_id: message.message_id(),
            payload: serde_json::to_value(message)?,
        })
    }

    pub fn into_message<M: Message>(self) -> Result<M, MessageError> {
        if self.message_type != M::message_type() {
            error!(
                expected = M::message_type(),
                actual = %self.message_type,
                message_id = %self.message_id,
                "Message type mismatch"
            );
            return Err(MessageError::TypeMismatch {
                expected: M::message_type().to_string(),
                actual: self.message_type,
            });
        }

        serde_json::from_value(self.payload).map_err(|e| {
            error!(error = %e, message_id = %self.message_id, "Message deserialization failed");
            MessageError::Serialization(e)
        })
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        id: String,
    }

    impl Message for Ping {
        fn message_type() -> &'static str {
            "ping"
        }

        fn message_id(&self) -> String {
            self.id.clone()
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Pong {
        id: String,
    }

    impl Message for Pong {
        fn message_type() -> &'static str {
            "pong"
        }

        fn message_id(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn envelope_round_trip() {
        let ping = Ping { id: "m1".into() };
        let envelope = MessageEnvelope::from_message(&ping).unwrap();
        assert_eq!(envelope.message_type, "ping");
        let decoded: Ping = envelope.into_message().unwrap();
        assert_eq!(decoded, ping);
    }

    #[test]
    fn envelope_rejects_wrong_type() {
        let ping = Ping { id: "m1".into() };
        let envelope = MessageEnvelope::from_message(&ping).unwrap();
        let err = envelope.into_message::<Pong>().unwrap_err();
        assert!(matches!(err, MessageError::TypeMismatch { .. }));
    }
}
