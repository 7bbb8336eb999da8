//! In-memory transport standing in for a real WebSocket.
//!
//! [`SimulatedTransport`] opens [`SimulatedSocket`]s that never touch the
//! network. A socket becomes open after the configured delay, greets the
//! client with a `welcome` frame, and records every frame the client sends
//! so tests can inspect the raw wire traffic.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{InboundEnvelope, OutboundEnvelope, decode_outbound, encode};
use crate::scheduler::Scheduler;

use super::socket::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, EventSink, ReadyState, Transport, TransportEvent,
    TransportFactory,
};

// ============================================================================
// Constants
// ============================================================================

/// Number of most recent sockets a factory keeps for inspection.
pub const RETAINED_SOCKETS: usize = 16;

// ============================================================================
// SimulatedTransport
// ============================================================================

/// Factory for in-memory sockets.
pub struct SimulatedTransport {
    /// Scheduler driving the open delay.
    scheduler: Scheduler,
    /// Delay between construction and the `open` event.
    open_delay: Duration,
    /// Most recently opened sockets, oldest first.
    sockets: Mutex<Vec<Arc<SimulatedSocket>>>,
    /// Sockets opened over the factory's lifetime.
    opened: AtomicUsize,
}

impl fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("open_delay", &self.open_delay)
            .field("opened", &self.opened.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SimulatedTransport {
    /// Creates a factory whose sockets open after `open_delay`.
    #[must_use]
    pub fn new(scheduler: Scheduler, open_delay: Duration) -> Self {
        Self {
            scheduler,
            open_delay,
            sockets: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        }
    }

    /// Returns the most recently opened socket.
    #[must_use]
    pub fn last_socket(&self) -> Option<Arc<SimulatedSocket>> {
        self.sockets.lock().last().cloned()
    }

    /// Returns the retained sockets, oldest first.
    ///
    /// Only the last [`RETAINED_SOCKETS`] are kept.
    #[must_use]
    pub fn sockets(&self) -> Vec<Arc<SimulatedSocket>> {
        self.sockets.lock().clone()
    }

    /// Returns how many sockets have been opened.
    #[inline]
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl TransportFactory for SimulatedTransport {
    fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: EventSink,
    ) -> Result<Arc<dyn Transport>> {
        let socket = Arc::new(SimulatedSocket {
            url: url.clone(),
            protocol: protocols.first().cloned(),
            state: Mutex::new(ReadyState::Connecting),
            events,
            sent: Mutex::new(Vec::new()),
        });

        debug!(url = %url, delay_ms = self.open_delay.as_millis() as u64, "Opening simulated socket");

        let weak = Arc::downgrade(&socket);
        self.scheduler.schedule(self.open_delay, move || {
            if let Some(socket) = weak.upgrade() {
                socket.accept();
            }
        });

        {
            let mut sockets = self.sockets.lock();
            sockets.push(Arc::clone(&socket));
            let excess = sockets.len().saturating_sub(RETAINED_SOCKETS);
            sockets.drain(..excess);
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(socket)
    }
}

// ============================================================================
// SimulatedSocket
// ============================================================================

/// One in-memory socket.
pub struct SimulatedSocket {
    /// URL the socket was opened with.
    url: Url,
    /// Negotiated subprotocol.
    protocol: Option<String>,
    /// Ready state.
    state: Mutex<ReadyState>,
    /// Event sink of the owning controller.
    events: EventSink,
    /// Frames written by the client.
    sent: Mutex<Vec<String>>,
}

impl fmt::Debug for SimulatedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedSocket")
            .field("url", &self.url.as_str())
            .field("protocol", &self.protocol)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SimulatedSocket {
    /// Completes the handshake: emits `open` then a `welcome` frame.
    ///
    /// No-op unless the socket is still connecting.
    pub fn accept(&self) {
        {
            let mut state = self.state.lock();
            if *state != ReadyState::Connecting {
                return;
            }
            *state = ReadyState::Open;
        }

        debug!(url = %self.url, "Simulated socket open");
        (self.events)(TransportEvent::Open);

        let delivered = encode(&InboundEnvelope::Welcome.to_value())
            .and_then(|welcome| self.deliver(&welcome));
        if let Err(e) = delivered {
            trace!(url = %self.url, error = %e, "Welcome frame not delivered");
        }
    }

    /// Pushes a server frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is not open.
    pub fn deliver(&self, text: &str) -> Result<()> {
        if *self.state.lock() != ReadyState::Open {
            return Err(Error::ConnectionClosed);
        }
        trace!(text, "Simulated socket delivering frame");
        (self.events)(TransportEvent::Message(text.to_string()));
        Ok(())
    }

    /// Drops the connection from the server side without a close frame.
    pub fn drop_connection(&self) {
        if !self.mark_closed() {
            return;
        }
        debug!(url = %self.url, "Simulated socket dropped");
        (self.events)(TransportEvent::Close {
            code: CLOSE_ABNORMAL,
            reason: "connection dropped".to_string(),
        });
    }

    /// Returns the negotiated subprotocol.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Returns every frame written by the client, oldest first.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Returns the client frames that decode as commands.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<OutboundEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| decode_outbound(frame).ok())
            .collect()
    }

    /// Moves the socket to closed; returns `false` if it already was.
    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ReadyState::Closed {
            return false;
        }
        *state = ReadyState::Closed;
        true
    }
}

impl Transport for SimulatedSocket {
    fn send(&self, text: &str) -> Result<()> {
        if *self.state.lock() != ReadyState::Open {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        if !self.mark_closed() {
            return;
        }
        let code = code.unwrap_or(CLOSE_NORMAL);
        debug!(url = %self.url, code, "Simulated socket closed");
        (self.events)(TransportEvent::Close {
            code,
            reason: reason.unwrap_or_default().to_string(),
        });
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

// ============================================================================
// Tests
// ============================================================================
