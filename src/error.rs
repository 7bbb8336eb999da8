//! Error types for the cable simulator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cable_simulator::{Consumer, Result};
//!
//! async fn example(consumer: &Consumer) -> Result<()> {
//!     let subscription = consumer.subscribe("ChatChannel", Callbacks::new());
//!     subscription.perform("speak", json!({ "message": "hi" }))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`], [`Error::InvalidIdentifier`] |
//! | Misuse | [`Error::InvalidOperation`] |
//! | Protocol | [`Error::Decode`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Timeout`] |
//! | External | [`Error::Json`], [`Error::Url`] |
//!
//! Decode errors, routing misses and listener panics never escape the engine;
//! they are logged and counted. Only misuse of the API surfaces as `Err`.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::subscription::SubscriptionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when consumer options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Channel identifier could not be built.
    ///
    /// Returned when a JSON value is neither a channel name nor an
    /// object carrying a string `channel` key.
    #[error("Invalid channel identifier: {message}")]
    InvalidIdentifier {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Misuse Errors
    // ========================================================================
    /// Operation is not allowed in the subscription's current state.
    ///
    /// Returned by `perform`/`send` on a subscription that is not confirmed.
    #[error("Cannot {operation} on {identifier}: subscription is {state}")]
    InvalidOperation {
        /// The attempted operation.
        operation: &'static str,
        /// Canonical identifier of the subscription.
        identifier: String,
        /// State the subscription was in.
        state: SubscriptionState,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound frame could not be decoded into an envelope.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport failed to open or write.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport is closed or the consumer was dropped.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timeout.
    ///
    /// Returned when an awaited state is not reached in time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cable URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid identifier error.
    #[inline]
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    #[inline]
    pub fn invalid_operation(
        operation: &'static str,
        identifier: impl Into<String>,
        state: SubscriptionState,
    ) -> Self {
        Self::InvalidOperation {
            operation,
            identifier: identifier.into(),
            state,
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a misuse of a subscription.
    #[inline]
    #[must_use]
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation { .. })
    }

    /// Returns `true` if this is a decode error.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
