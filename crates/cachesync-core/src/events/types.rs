//! Event types published by entity stores.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Type of entity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Entity was created
    Created,
    /// Entity was updated
    Updated,
    /// Entity was deleted
    Deleted,
}

impl EventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [EventKind; 3] = [EventKind::Created, EventKind::Updated, EventKind::Deleted];

    /// Returns the string representation of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change notification for a single entity.
///
/// Events are immutable once built. They are not persisted: a subscriber
/// that is not registered when an event is published never sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<K, V> {
    /// Unique id of this notification
    pub event_id: Uuid,
    /// Type of change
    pub kind: EventKind,
    /// Identity of the changed entity
    pub entity_id: K,
    /// The entity after the change (None for deletions)
    pub payload: Option<V>,
    /// Timestamp of the event
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl<K, V> Event<K, V> {
    /// Create a new event.
    pub fn new(kind: EventKind, entity_id: K, payload: Option<V>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            entity_id,
            payload,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "created" event.
    pub fn created(entity_id: K, payload: V) -> Self {
        Self::new(EventKind::Created, entity_id, Some(payload))
    }

    /// Create an "updated" event.
    pub fn updated(entity_id: K, payload: V) -> Self {
        Self::new(EventKind::Updated, entity_id, Some(payload))
    }

    /// Create a "deleted" event.
    pub fn deleted(entity_id: K) -> Self {
        Self::new(EventKind::Deleted, entity_id, None)
    }

    /// Check if this event passes a kind filter. An empty filter matches all.
    pub fn matches_kinds(&self, kinds: &[EventKind]) -> bool {
        kinds.is_empty() || kinds.contains(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let created = Event::created(42u64, "Alvin".to_string());
        assert_eq!(created.kind, EventKind::Created);
        assert_eq!(created.payload.as_deref(), Some("Alvin"));

        let deleted: Event<u64, String> = Event::deleted(42);
        assert_eq!(deleted.kind, EventKind::Deleted);
        assert!(deleted.payload.is_none());
        assert_ne!(created.event_id, deleted.event_id);
    }

    #[test]
    fn test_kind_filter() {
        let event = Event::updated(1u64, 10u32);
        assert!(event.matches_kinds(&[]));
        assert!(event.matches_kinds(&[EventKind::Updated, EventKind::Deleted]));
        assert!(!event.matches_kinds(&[EventKind::Created]));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::updated(7u64, "Bob".to_string());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "updated");
        assert_eq!(json["entity_id"], 7);
        assert_eq!(json["payload"], "Bob");

        let back: Event<u64, String> = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_id, event.event_id);
    }
}
