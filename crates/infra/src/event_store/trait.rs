use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use wareflow_core::{AggregateId, ExpectedVersion, TenantId};
use std::sync::Arc;

/// An event ready to be appended to a stream, before the store has assigned
/// it a sequence number.
///
/// Events pass through four shapes: the typed domain event produced by
/// `handle()`, an `UncommittedEvent` carrying stream metadata, a
/// `StoredEvent` once the store has assigned a sequence number, and an
/// `EventEnvelope` when published to consumers.
///
/// Build one with [`UncommittedEvent::from_typed`], which serializes the
/// domain event to JSON and captures its metadata (`event_type`, `version`,
/// `occurred_at`) so that history can later be deserialized back into the
/// typed event enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// An event persisted in an append-only stream.
///
/// Sequence numbers are assigned by the store during append, are scoped to
/// one `(tenant_id, aggregate_id)` stream, start at 1, and increase by one
/// per event. They drive replay ordering, optimistic concurrency checks and
/// projection idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a tenant-scoped envelope for publication.
    pub fn to_envelope(&self) -> wareflow_events::EventEnvelope<JsonValue> {
        wareflow_events::EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are infrastructure failures (storage, concurrency, isolation), as
/// opposed to the domain errors an aggregate raises while deciding events.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed; the caller lost the race and
    /// must re-read before retrying.
    #[error("stream version conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Publication failed after a successful append. The events are durable;
    /// delivery is at-least-once, so a retry may duplicate envelopes.
    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only, tenant-scoped event store.
///
/// Events live in streams, one stream per aggregate instance, keyed by
/// `(tenant_id, aggregate_id)`. Implementations must:
///
/// - enforce tenant isolation on reads and writes (a stream is never visible
///   to another tenant)
/// - enforce optimistic concurrency against the current stream version
/// - assign `sequence_number`s monotonically starting at
///   `current_version + 1`, with no gaps
/// - persist a batch atomically: after a failed append no event of the batch
///   is visible to any reader
///
/// `load_stream` returns the full stream in sequence order, or an empty
/// vector for a stream that does not exist yet.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, aggregate_id)
    }
}

impl UncommittedEvent {
    /// Wrap a typed domain event with stream metadata.
    pub fn from_typed<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: wareflow_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
