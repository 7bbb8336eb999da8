//! Transport layer.
//!
//! The connection controller talks to the outside world only through the
//! [`Transport`] trait, a stand-in for the browser `WebSocket` object.
//! [`SimulatedTransport`] provides the in-memory implementation used by
//! default.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   send(text)    ┌──────────────────────┐
//! │ ConnectionController │ ──────────────► │  Transport           │
//! │                      │ ◄────────────── │  (SimulatedSocket)   │
//! └──────────────────────┘  TransportEvent └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `simulated` | In-memory socket and factory |
//! | `socket` | Transport trait, events and ready state |

// ============================================================================
// Submodules
// ============================================================================

/// In-memory socket implementation.
pub mod simulated;

/// Transport contract.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use simulated::{SimulatedSocket, SimulatedTransport};
pub use socket::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, EventSink, ReadyState, Transport, TransportEvent,
    TransportFactory,
};
