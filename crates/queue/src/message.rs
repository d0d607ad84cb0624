use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Envelope for a dispatched task.
///
/// The payload is MessagePack-encoded. `id` stays the same across retries of
/// one dispatch so a retried task can be correlated in logs; a continuation
/// dispatched by a handler is a new message with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,

    /// Stable task name used to route the payload (e.g. "rulescope.scope_recompute").
    pub name: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    pub enqueued_at: DateTime<Utc>,

    /// Zero on first delivery, incremented on every retry.
    #[serde(default)]
    pub attempt: u32,

    /// Number of retries allowed after the first failed execution.
    pub max_retries: u32,
}

impl TaskMessage {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
        max_retries: u32,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: rmp_serde::to_vec(payload)?,
            enqueued_at: Utc::now(),
            attempt: 0,
            max_retries,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    /// The same message for its next delivery attempt.
    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Whether a failure on this attempt may still be retried.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
