use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;

/// Fixed per-event allowance for the timestamp and JSON framing.
///
/// Batch sizes are estimates: `body.len() + EVENT_OVERHEAD_BYTES` per event.
pub const EVENT_OVERHEAD_BYTES: usize = 50;

/// A client event as received on the ingest endpoint and written to the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event_timestamp", with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            timestamp,
            body: body.into(),
        }
    }

    /// Parses and validates an event from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StorageError> {
        let event: Event = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::InvalidInput(format!("Invalid JSON: {}", e)))?;
        event.validate()?;
        Ok(event)
    }

    /// Rejects events whose body is empty or whitespace only.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.body.trim().is_empty() {
            return Err(StorageError::InvalidInput("body is required".into()));
        }
        Ok(())
    }

    /// Approximate serialized size used for the size trigger: the body's UTF-8
    /// byte length plus a fixed overhead. Non-ASCII bodies count their encoded
    /// bytes, not characters or UTF-16 code units.
    #[inline]
    pub fn estimated_size(&self) -> usize {
        self.body.len() + EVENT_OVERHEAD_BYTES
    }
}

/// A detached, immutable group of events for one tier.
///
/// `sequence` increases per tier in detach order, so sorting a tier's batches by
/// it restores creation order even when uploads finish out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub tier: String,
    pub sequence: u64,
    pub events: Vec<Event>,
    pub estimated_bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serializes the events as a JSON array in insertion order.
    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(&self.events).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Point-in-time view of an accumulating buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: String,
    pub events: usize,
    pub estimated_bytes: usize,
}

/// ISO-8601 instants with millisecond precision and a trailing `Z`.
mod timestamp_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
