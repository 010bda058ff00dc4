//! Event shape for the `/events` stream and internal pub/sub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTarget {
    Container,
    Image,
    Network,
    Volume,
}

/// A single structured event, newline-delimited JSON on the wire.
///
/// Ordered per-`id` by `version` (the container's version counter, for
/// container events); ordering across different `id`s is best-effort only,
/// per the concurrency model's ordering guarantees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub target: EventTarget,
    pub id: String,
    pub action: String,
    pub time: DateTime<Utc>,
    /// Monotonic counter for this `id`; absent for non-versioned targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Event {
    pub fn container(id: impl Into<String>, action: impl Into<String>, version: u64) -> Self {
        Self {
            target: EventTarget::Container,
            id: id.into(),
            action: action.into(),
            time: Utc::now(),
            version: Some(version),
        }
    }

    pub fn image(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            target: EventTarget::Image,
            id: id.into(),
            action: action.into(),
            time: Utc::now(),
            version: None,
        }
    }

    pub fn network(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            target: EventTarget::Network,
            id: id.into(),
            action: action.into(),
            time: Utc::now(),
            version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_event_round_trips_through_json() {
        let event = Event::container("c1", "start", 3);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "c1");
        assert_eq!(back.version, Some(3));
    }
}
