//! Diagnostic history of every protocol event sent or received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Client,
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggedEvent {
    pub id: u64,
    pub direction: Direction,
    pub event_name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub expanded: bool,
}

/// Append-only event history.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<LoggedEvent>,
    next_id: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `payload` and returns the id assigned to it. The event name is
    /// taken from the payload's `type` field.
    pub fn record(&mut self, direction: Direction, payload: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let event_name = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        self.events.push(LoggedEvent {
            id,
            direction,
            event_name,
            payload,
            timestamp: Utc::now(),
            expanded: false,
        });
        id
    }

    pub fn toggle_expand(&mut self, id: u64) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.expanded = !event.expanded;
                true
            }
            None => false,
        }
    }

    pub fn events(&self) -> &[LoggedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_increase_monotonically() {
        let mut log = EventLog::new();
        let a = log.record(Direction::Client, json!({"type": "session.update"}));
        let b = log.record(Direction::Server, json!({"type": "session.created"}));
        let c = log.record(Direction::Server, json!("not an object"));
        assert!(a < b && b < c);
        assert_eq!(log.events()[0].event_name, "session.update");
        assert_eq!(log.events()[1].direction, Direction::Server);
        assert_eq!(log.events()[2].event_name, "unknown");
    }

    #[test]
    fn test_toggle_expand() {
        let mut log = EventLog::new();
        let id = log.record(Direction::Server, json!({"type": "response.done"}));
        assert!(log.toggle_expand(id));
        assert!(log.events()[0].expanded);
        assert!(log.toggle_expand(id));
        assert!(!log.events()[0].expanded);
        assert!(!log.toggle_expand(99));
    }
}
