//! Cable Simulator - Action Cable consumer simulation for browser tests.
//!
//! This library stands in for a Rails Action Cable server and client pair.
//! Tests subscribe to channels, assert what the application sends upstream
//! and inject downstream messages, all without a real server.
//!
//! # Architecture
//!
//! ```text
//! test ──► Consumer ──► ConnectionController ──► Transport (SimulatedSocket)
//!              │               │      ▲
//!              │               │      └── frames ── decode ── network policy
//!              ▼               ▼
//!          Registry ◄──── dispatch ──► Subscription callbacks
//! ```
//!
//! Key design principles:
//!
//! - One [`Consumer`] owns one connection; clones share it
//! - Channel identifiers are canonicalized once, with sorted keys
//! - Several subscriptions may share an identifier; dispatch reaches all of them
//! - Timers (confirmation, latency, interruption) are cancellable tasks
//! - A panicking callback is logged and skipped
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cable_simulator::{Callbacks, ChannelIdentifier, Consumer, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let consumer = Consumer::builder().auto_connect(true).build()?;
//!     consumer.wait_until_connected(Duration::from_secs(1)).await?;
//!
//!     let room = ChannelIdentifier::new("ChatChannel").param("room", 1);
//!     let subscription = consumer.subscribe(
//!         room.clone(),
//!         Callbacks::new().on_received(|payload| println!("received {payload}")),
//!     );
//!     subscription
//!         .wait_for_state(cable_simulator::SubscriptionState::Confirmed, Duration::from_secs(1))
//!         .await?;
//!
//!     consumer.simulate_incoming_message(room, json!({"text": "hi"}));
//!     subscription.perform("speak", json!({"message": "hello"}))?;
//!
//!     for entry in consumer.outgoing_history() {
//!         println!("{:?} {:?}", entry.command(), entry.data());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Connection controller and network simulation |
//! | [`consumer`] | [`Consumer`] facade, options and builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`history`] | Envelope history recorder |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelopes, identifiers and codec |
//! | [`scheduler`] | Cancellable delayed tasks |
//! | [`subscription`] | Subscription records, callbacks and registry |
//! | [`transport`] | Transport contract and in-memory socket |

// ============================================================================
// Modules
// ============================================================================

/// Connection lifecycle, routing and network-condition simulation.
pub mod connection;

/// Consumer facade.
///
/// Use [`Consumer::builder()`] to create a configured consumer.
pub mod consumer;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Append-only envelope history.
pub mod history;

/// Type-safe identifiers.
pub mod identifiers;

/// Action Cable wire protocol.
pub mod protocol;

/// Cancellable delayed tasks.
pub mod scheduler;

/// Subscription records and registry.
pub mod subscription;

/// Transport contract and simulated socket.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    ConnectionState, ConsumerStats, Delivery, InterruptionOptions, Latency, NetworkConditions,
    SendOutcome, UnhandledMessage, UnhandledReason,
};

// Consumer types
pub use consumer::{Consumer, ConsumerBuilder, ConsumerOptions};

// Error types
pub use error::{Error, Result};

// History types
pub use history::{Direction, HistoryEntry};

// Identifier types
pub use identifiers::{SubscriptionId, TaskId};

// Protocol types
pub use protocol::{CanonicalIdentifier, ChannelIdentifier, InboundEnvelope, OutboundEnvelope};

// Subscription types
pub use subscription::{CallbackEvent, Callbacks, Subscription, SubscriptionState};
