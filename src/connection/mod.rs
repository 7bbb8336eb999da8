//! Connection management.
//!
//! The controller owns the transport, drives the connection lifecycle and
//! sits between the transport and the subscription registry. Inbound data
//! messages pass through the network simulator on the way.
//!
//! # Architecture
//!
//! ```text
//!  Transport ──frame──► ConnectionController ──decode──► InboundEnvelope
//!                              │                              │
//!                              │                   NetworkSimulator::admit
//!                              │                              │
//!                              ◄──────── transmit ─── Registry::dispatch_incoming
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `controller` | Connection lifecycle and routing |
//! | `network` | Latency, packet loss and interruption settings |
//! | `state` | Connection state, outcomes and counters |

// ============================================================================
// Submodules
// ============================================================================

/// Connection lifecycle and routing.
pub(crate) mod controller;

/// Network-condition simulation.
pub mod network;

/// Connection state and reported values.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use controller::CONNECTION_MONITOR_CHANNEL;
pub use network::{Admission, InterruptionOptions, Latency, NetworkConditions, NetworkSimulator};
pub use state::{
    ConnectionState, ConsumerStats, Delivery, SendOutcome, UnhandledCallback, UnhandledMessage,
    UnhandledReason,
};
