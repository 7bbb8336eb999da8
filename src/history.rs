//! Message history recorder.
//!
//! An append-only log of every envelope that crossed the simulated
//! connection, with timestamps, for test assertions. Keepalive frames and
//! the internal connection-monitor subscription are never recorded.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

// ============================================================================
// Direction
// ============================================================================

/// Which way an envelope travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server → client.
    Incoming,
    /// Client → server.
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => f.write_str("incoming"),
            Self::Outgoing => f.write_str("outgoing"),
        }
    }
}

// ============================================================================
// HistoryEntry
// ============================================================================

/// One recorded envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Direction of travel.
    pub direction: Direction,

    /// Envelope in its wire JSON shape.
    pub envelope: Value,

    /// Wall-clock time in milliseconds since the Unix epoch.
    #[serde(rename = "timestampMillis")]
    pub timestamp_ms: u64,

    /// Time since the recorder was created, on the runtime clock.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl HistoryEntry {
    /// Returns `true` for client → server entries.
    #[inline]
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    /// Returns `true` for server → client entries.
    #[inline]
    #[must_use]
    pub fn is_incoming(&self) -> bool {
        self.direction == Direction::Incoming
    }

    /// Returns the `command` field of outgoing envelopes.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.envelope.get("command").and_then(Value::as_str)
    }

    /// Returns the `type` field of incoming control envelopes.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.envelope.get("type").and_then(Value::as_str)
    }

    /// Returns the `identifier` field.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.envelope.get("identifier").and_then(Value::as_str)
    }

    /// Returns the payload: decoded `data` for outgoing messages, `message`
    /// for incoming ones.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        if let Some(data) = self.envelope.get("data").and_then(Value::as_str) {
            return serde_json::from_str(data).ok();
        }
        self.envelope.get("message").cloned()
    }
}

// ============================================================================
// HistoryRecorder
// ============================================================================

/// Append-only envelope log.
pub struct HistoryRecorder {
    /// Whether `record` stores anything.
    enabled: AtomicBool,
    /// Recorded entries, oldest first.
    entries: Mutex<Vec<HistoryEntry>>,
    /// Creation time on the runtime clock.
    started: Instant,
}

impl fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl HistoryRecorder {
    /// Creates a recorder.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    /// Appends an entry stamped with the current time.
    pub fn record(&self, direction: Direction, envelope: Value) {
        if !self.is_enabled() {
            return;
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        self.entries.lock().push(HistoryEntry {
            direction,
            envelope,
            timestamp_ms,
            elapsed: self.started.elapsed(),
        });
    }

    /// Returns every entry, oldest first.
    #[must_use]
    pub fn get_all(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }

    /// Returns entries travelling in `direction`.
    #[must_use]
    pub fn filter(&self, direction: Direction) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.direction == direction)
            .cloned()
            .collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if recording is on.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turns recording on or off. Existing entries are kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_get_all() {
        let recorder = HistoryRecorder::new(true);
        recorder.record(Direction::Outgoing, json!({ "command": "subscribe" }));
        recorder.record(Direction::Incoming, json!({ "type": "welcome" }));

        let entries = recorder.get_all();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_outgoing());
        assert_eq!(entries[0].command(), Some("subscribe"));
        assert!(entries[1].is_incoming());
        assert_eq!(entries[1].kind(), Some("welcome"));
    }

    #[tokio::test]
    async fn test_disabled_recorder_ignores_entries() {
        let recorder = HistoryRecorder::new(false);
        recorder.record(Direction::Outgoing, json!({}));
        assert!(recorder.is_empty());

        recorder.set_enabled(true);
        recorder.record(Direction::Outgoing, json!({}));
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let recorder = HistoryRecorder::new(true);
        recorder.record(Direction::Incoming, json!({}));
        recorder.clear();
        assert!(recorder.get_all().is_empty());
    }

    #[tokio::test]
    async fn test_filter_by_direction() {
        let recorder = HistoryRecorder::new(true);
        recorder.record(Direction::Incoming, json!({ "n": 1 }));
        recorder.record(Direction::Outgoing, json!({ "n": 2 }));
        recorder.record(Direction::Incoming, json!({ "n": 3 }));

        let incoming = recorder.filter(Direction::Incoming);
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[1].envelope["n"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_uses_runtime_clock() {
        let recorder = HistoryRecorder::new(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        recorder.record(Direction::Incoming, json!({}));
        assert!(recorder.get_all()[0].elapsed >= Duration::from_secs(5));
    }

    #[test]
    fn test_entry_data_decodes_outgoing_string() {
        let entry = HistoryEntry {
            direction: Direction::Outgoing,
            envelope: json!({
                "command": "message",
                "identifier": "{\"channel\":\"Chat\"}",
                "data": "{\"action\":\"speak\"}"
            }),
            timestamp_ms: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(entry.data(), Some(json!({ "action": "speak" })));
        assert_eq!(entry.identifier(), Some("{\"channel\":\"Chat\"}"));
    }

    #[test]
    fn test_entry_data_incoming_message() {
        let entry = HistoryEntry {
            direction: Direction::Incoming,
            envelope: json!({ "identifier": "x", "message": { "text": "hi" } }),
            timestamp_ms: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(entry.data(), Some(json!({ "text": "hi" })));
    }
}
