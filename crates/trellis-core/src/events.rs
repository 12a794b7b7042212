//! Domain events handed to the notification collaborator.
//!
//! Emission is fire-and-forget: a sink never fails the operation that
//! produced the event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification codes understood by downstream consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// Document added.
    D01,
    /// Document updated.
    D02,
    /// Document deleted.
    D04,
    /// Document derived from another.
    D05,
    /// Document imported.
    D10,
    /// Tree updated.
    I06,
    /// Association added.
    A01,
    /// Association deleted.
    A04,
}

/// Payload bucket names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKey {
    #[serde(rename = "doc-a")]
    DocAdded,
    #[serde(rename = "doc-u")]
    DocUpdated,
    #[serde(rename = "doc-d")]
    DocDeleted,
    #[serde(rename = "item-a")]
    ItemAdded,
    #[serde(rename = "item-u")]
    ItemUpdated,
    #[serde(rename = "assoc-a")]
    AssocAdded,
    #[serde(rename = "assoc-u")]
    AssocUpdated,
    #[serde(rename = "assoc-d")]
    AssocDeleted,
    #[serde(rename = "lock")]
    Lock,
}

/// An entity touched by an operation, as reported to consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRef {
    pub id: i64,
    pub identifier: String,
}

impl EntityRef {
    pub fn new(id: i64, identifier: impl ToString) -> Self {
        Self {
            id,
            identifier: identifier.to_string(),
        }
    }
}

/// An event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub code: EventCode,
    pub message: String,
    /// The document the event concerns.
    pub subject: Option<EntityRef>,
    pub payload: BTreeMap<ChangeKey, Vec<EntityRef>>,
}

impl DomainEvent {
    pub fn new(code: EventCode, message: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            code,
            message: message.into(),
            subject: None,
            payload: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: EntityRef) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Append an entity to a payload bucket.
    pub fn with_change(mut self, key: ChangeKey, entity: EntityRef) -> Self {
        self.payload.entry(key).or_default().push(entity);
        self
    }

    pub fn with_changes(mut self, key: ChangeKey, entities: Vec<EntityRef>) -> Self {
        if !entities.is_empty() {
            self.payload.entry(key).or_default().extend(entities);
        }
        self
    }
}

/// Receiver of domain events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DomainEvent) {}
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();
        tracing::info!(
            event_id = %event.id.0,
            code = ?event.code,
            subject = event.subject.as_ref().map(|s| s.identifier.as_str()),
            %payload,
            "{}",
            event.message
        );
    }
}

/// Forwards events over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped; discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_keys_serialize_with_short_names() {
        let event = DomainEvent::new(EventCode::I06, "Tree updated")
            .with_change(ChangeKey::AssocAdded, EntityRef::new(4, "a-4"))
            .with_change(ChangeKey::AssocDeleted, EntityRef::new(2, "a-2"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], "I06");
        assert_eq!(json["payload"]["assoc-a"][0]["id"], 4);
        assert_eq!(json["payload"]["assoc-d"][0]["identifier"], "a-2");
    }

    #[test]
    fn empty_change_lists_are_omitted() {
        let event = DomainEvent::new(EventCode::D02, "Document updated")
            .with_changes(ChangeKey::ItemAdded, Vec::new());
        assert!(event.payload.is_empty());
    }

    #[tokio::test]
    async fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(
            DomainEvent::new(EventCode::D10, "Document imported")
                .with_subject(EntityRef::new(1, "doc-1")),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.code, EventCode::D10);
        assert_eq!(event.subject.unwrap().id, 1);
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(DomainEvent::new(EventCode::A04, "Association deleted"));
    }
}
