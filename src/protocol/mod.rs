//! Action Cable wire protocol.
//!
//! This module defines the JSON envelopes exchanged over the transport,
//! channel identifiers and their canonical form, and the codec.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `subscribe` / `unsubscribe` | Client → Server | Subscription lifecycle |
//! | `message` | Client → Server | Perform an action on a channel |
//! | `welcome` | Server → Client | Connection accepted |
//! | `confirm_subscription` / `reject_subscription` | Server → Client | Subscription outcome |
//! | `ping` / `pong` | Both | Keepalive |
//! | data frame | Server → Client | Channel broadcast |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Encode/decode functions |
//! | `envelope` | Envelope types |
//! | `identifier` | Channel identifiers and canonicalization |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope encode/decode functions.
pub mod codec;

/// Inbound and outbound envelope types.
pub mod envelope;

/// Channel identifiers and canonical form.
pub mod identifier;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{decode_inbound, decode_outbound, encode};
pub use envelope::{InboundEnvelope, OutboundEnvelope, PongFrame};
pub use identifier::{CanonicalIdentifier, ChannelIdentifier, canonical_json};
