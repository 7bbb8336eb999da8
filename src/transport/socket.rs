//! Transport contract consumed by the connection controller.
//!
//! Mirrors the browser `WebSocket` surface: construction with a URL and
//! subprotocols, `send`, `close`, a ready state, and `open` / `message` /
//! `close` / `error` events delivered to an [`EventSink`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when the connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// ReadyState
// ============================================================================

/// Readiness of a transport, matching `WebSocket.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Close requested.
    Closing,
    /// Closed, cannot be reopened.
    Closed,
}

impl ReadyState {
    /// Returns the numeric value used by browsers (0-3).
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,
    /// Text frame received.
    Message(String),
    /// Connection closed.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Transport-level failure.
    Error(String),
}

/// Callback receiving transport events.
///
/// Called from whichever task produced the event; implementations must not
/// block.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// A bidirectional text-message channel.
pub trait Transport: Send + Sync {
    /// Writes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConnectionClosed`] if the transport is not open.
    fn send(&self, text: &str) -> Result<()>;

    /// Starts closing the transport.
    fn close(&self, code: Option<u16>, reason: Option<&str>);

    /// Returns the current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Returns the URL the transport was opened with.
    fn url(&self) -> &Url;
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Constructs transports for the connection controller.
pub trait TransportFactory: Send + Sync {
    /// Opens a new transport.
    ///
    /// The returned transport starts in [`ReadyState::Connecting`] and emits
    /// [`TransportEvent::Open`] through `events` once established.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the transport cannot be created.
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: EventSink,
    ) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_values() {
        assert_eq!(ReadyState::Connecting.as_u8(), 0);
        assert_eq!(ReadyState::Open.as_u8(), 1);
        assert_eq!(ReadyState::Closing.as_u8(), 2);
        assert_eq!(ReadyState::Closed.as_u8(), 3);
    }

    #[test]
    fn test_ready_state_display() {
        assert_eq!(ReadyState::Open.to_string(), "open");
        assert_eq!(ReadyState::Closed.to_string(), "closed");
    }
}
