//! Envelope message types.
//!
//! # Outbound (client → server)
//!
//! ```json
//! { "command": "subscribe",   "identifier": "{\"channel\":\"ChatChannel\"}" }
//! { "command": "unsubscribe", "identifier": "{\"channel\":\"ChatChannel\"}" }
//! { "command": "message",     "identifier": "...", "data": "{\"action\":\"speak\"}" }
//! { "type": "pong", "message": 1700000000 }
//! ```
//!
//! # Inbound (server → client)
//!
//! | `type` | Fields |
//! |--------|--------|
//! | `welcome` | - |
//! | `disconnect` | `reason`, `reconnect` |
//! | `ping` / `pong` | `message` |
//! | `confirm_subscription` / `reject_subscription` | `identifier` |
//! | *(absent)* | `identifier`, `message` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::identifier::CanonicalIdentifier;

// ============================================================================
// OutboundEnvelope
// ============================================================================

/// A command sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    /// Subscribe to a channel.
    Subscribe {
        /// Canonical identifier.
        identifier: String,
    },

    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Canonical identifier.
        identifier: String,
    },

    /// Perform an action or send data on a channel.
    Message {
        /// Canonical identifier.
        identifier: String,
        /// JSON-encoded payload string.
        data: String,
    },
}

impl OutboundEnvelope {
    /// Creates a subscribe command.
    #[inline]
    #[must_use]
    pub fn subscribe(identifier: &CanonicalIdentifier) -> Self {
        Self::Subscribe {
            identifier: identifier.as_str().to_string(),
        }
    }

    /// Creates an unsubscribe command.
    #[inline]
    #[must_use]
    pub fn unsubscribe(identifier: &CanonicalIdentifier) -> Self {
        Self::Unsubscribe {
            identifier: identifier.as_str().to_string(),
        }
    }

    /// Creates a message command carrying `payload` as its data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    pub fn message(identifier: &CanonicalIdentifier, payload: &Value) -> Result<Self> {
        Ok(Self::Message {
            identifier: identifier.as_str().to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Creates a message command for `action`, merging it into `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the payload is neither an object
    /// nor null.
    pub fn perform(
        identifier: &CanonicalIdentifier,
        action: &str,
        payload: Value,
    ) -> Result<Self> {
        let mut data = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::invalid_argument(format!(
                    "perform payload must be an object, got {other}"
                )));
            }
        };
        data.insert("action".to_string(), Value::String(action.to_string()));
        Self::message(identifier, &Value::Object(data))
    }

    /// Returns the command name.
    #[inline]
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Message { .. } => "message",
        }
    }

    /// Returns the identifier string.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Subscribe { identifier }
            | Self::Unsubscribe { identifier }
            | Self::Message { identifier, .. } => identifier,
        }
    }

    /// Decodes the `data` field of a message command.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Message { data, .. } => serde_json::from_str(data).ok(),
            _ => None,
        }
    }
}

// ============================================================================
// PongFrame
// ============================================================================

/// Keepalive answer echoing a ping payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PongFrame {
    /// Frame type marker (always "pong").
    #[serde(rename = "type")]
    pub frame_type: &'static str,

    /// Echoed ping payload.
    pub message: Value,
}

impl PongFrame {
    /// Creates a pong echoing `message`.
    #[inline]
    #[must_use]
    pub fn echo(message: Value) -> Self {
        Self {
            frame_type: "pong",
            message,
        }
    }
}

// ============================================================================
// InboundEnvelope
// ============================================================================

/// A message sent from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    /// Greeting sent once per new connection.
    Welcome,

    /// Server is closing the connection.
    Disconnect {
        /// Reason given by the server.
        reason: Option<String>,
        /// Whether the client should reconnect.
        reconnect: bool,
    },

    /// Keepalive request.
    Ping {
        /// Payload to echo.
        message: Value,
    },

    /// Keepalive answer.
    Pong {
        /// Echoed payload.
        message: Value,
    },

    /// Server accepted a subscription.
    ConfirmSubscription {
        /// Normalized identifier.
        identifier: CanonicalIdentifier,
    },

    /// Server refused a subscription.
    RejectSubscription {
        /// Normalized identifier.
        identifier: CanonicalIdentifier,
    },

    /// Channel broadcast.
    Message {
        /// Normalized identifier.
        identifier: CanonicalIdentifier,
        /// Broadcast payload.
        message: Value,
    },

    /// Frame with an unrecognized `type`.
    Unknown {
        /// The unrecognized type.
        kind: String,
    },
}

impl InboundEnvelope {
    /// Returns `true` for connection and subscription control frames.
    ///
    /// These are recorded in history on receipt. Data messages are recorded
    /// once routed; keepalives and unknown frames never.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::Disconnect { .. }
                | Self::ConfirmSubscription { .. }
                | Self::RejectSubscription { .. }
        )
    }

    /// Converts the envelope back into its wire JSON shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };

        match self {
            Self::Welcome => put("type", "welcome".into()),
            Self::Disconnect { reason, reconnect } => {
                put("type", "disconnect".into());
                if let Some(reason) = reason {
                    put("reason", reason.as_str().into());
                }
                put("reconnect", (*reconnect).into());
            }
            Self::Ping { message } => {
                put("type", "ping".into());
                put("message", message.clone());
            }
            Self::Pong { message } => {
                put("type", "pong".into());
                put("message", message.clone());
            }
            Self::ConfirmSubscription { identifier } => {
                put("type", "confirm_subscription".into());
                put("identifier", identifier.as_str().into());
            }
            Self::RejectSubscription { identifier } => {
                put("type", "reject_subscription".into());
                put("identifier", identifier.as_str().into());
            }
            Self::Message {
                identifier,
                message,
            } => {
                put("identifier", identifier.as_str().into());
                put("message", message.clone());
            }
            Self::Unknown { kind } => put("type", kind.as_str().into()),
        }

        Value::Object(map)
    }
}

// ============================================================================
// RawInbound
// ============================================================================

/// Loose wire shape used while decoding inbound frames.
#[derive(Debug, Deserialize)]
pub(crate) struct RawInbound {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub message: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reconnect: Option<bool>,
}

/// Maps a present field to `Some`, keeping an explicit `null` as
/// `Some(Value::Null)`. Only an absent field falls back to `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawInbound> for InboundEnvelope {
    type Error = Error;

    fn try_from(raw: RawInbound) -> Result<Self> {
        let identifier = |raw: &RawInbound| {
            raw.identifier
                .as_deref()
                .map(CanonicalIdentifier::from_wire)
                .ok_or_else(|| Error::decode("missing `identifier`"))
        };

        match raw.kind.as_deref() {
            Some("welcome") => Ok(Self::Welcome),
            Some("disconnect") => Ok(Self::Disconnect {
                reason: raw.reason,
                reconnect: raw.reconnect.unwrap_or(false),
            }),
            Some("ping") => Ok(Self::Ping {
                message: raw.message.unwrap_or(Value::Null),
            }),
            Some("pong") => Ok(Self::Pong {
                message: raw.message.unwrap_or(Value::Null),
            }),
            Some("confirm_subscription") => Ok(Self::ConfirmSubscription {
                identifier: identifier(&raw)?,
            }),
            Some("reject_subscription") => Ok(Self::RejectSubscription {
                identifier: identifier(&raw)?,
            }),
            Some(other) => Ok(Self::Unknown {
                kind: other.to_string(),
            }),
            None => {
                let identifier = identifier(&raw)?;
                let message = raw
                    .message
                    .ok_or_else(|| Error::decode("data frame without `message`"))?;
                Ok(Self::Message {
                    identifier,
                    message,
                })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
