//! Connection state and the values the controller reports back.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::CanonicalIdentifier;
use crate::subscription::DispatchReport;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport opened, waiting for its `open` event.
    Connecting,
    /// Transport open; subscriptions may be confirmed.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SendOutcome
// ============================================================================

/// What happened to an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport.
    Sent,
    /// Discarded because no connection was live.
    Dropped,
}

impl SendOutcome {
    /// Returns `true` if the envelope reached the transport.
    #[inline]
    #[must_use]
    pub fn is_sent(self) -> bool {
        self == Self::Sent
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// What happened to an injected inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Routed immediately.
    Routed(DispatchReport),
    /// Held back by simulated latency; routed after the delay.
    Delayed(Duration),
    /// Lost to simulated packet loss.
    Dropped,
}

impl Delivery {
    /// Returns how many records received the message, if it was routed.
    #[must_use]
    pub fn delivered(&self) -> Option<usize> {
        match self {
            Self::Routed(report) => Some(report.delivered),
            Self::Delayed(_) | Self::Dropped => None,
        }
    }
}

// ============================================================================
// Unhandled messages
// ============================================================================

/// Why an inbound message reached no callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledReason {
    /// No record carries the identifier.
    NoSubscription,
    /// Records exist, but none is confirmed.
    NotConfirmed,
}

/// An inbound message that no record received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnhandledMessage {
    /// Target identifier.
    pub identifier: CanonicalIdentifier,
    /// Message payload.
    pub payload: Value,
    /// Why nothing received it.
    pub reason: UnhandledReason,
}

/// Listener for unhandled messages.
pub type UnhandledCallback = Arc<dyn Fn(&UnhandledMessage) + Send + Sync>;

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of the controller's fault counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConsumerStats {
    /// Inbound frames that failed to decode.
    pub decode_errors: u64,
    /// Outbound envelopes discarded while disconnected.
    pub dropped_sends: u64,
    /// Inbound messages lost to simulated packet loss.
    pub dropped_packets: u64,
    /// Inbound messages no record received.
    pub routing_misses: u64,
    /// Pings answered.
    pub pongs_sent: u64,
}

/// Live counters behind [`ConsumerStats`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) decode_errors: AtomicU64,
    pub(crate) dropped_sends: AtomicU64,
    pub(crate) dropped_packets: AtomicU64,
    pub(crate) routing_misses: AtomicU64,
    pub(crate) pongs_sent: AtomicU64,
}

impl Counters {
    /// Increments one counter.
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            dropped_sends: self.dropped_sends.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            routing_misses: self.routing_misses.load(Ordering::Relaxed),
            pongs_sent: self.pongs_sent.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.decode_errors,
            &self.dropped_sends,
            &self.dropped_packets,
            &self.routing_misses,
            &self.pongs_sent,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
