//! Channel identifiers and their canonical wire form.
//!
//! A channel is addressed either by a bare name (`"ChatChannel"`) or by an
//! object carrying a `channel` key plus arbitrary parameters
//! (`{"channel": "ChatChannel", "room": 1}`). Both are resolved once into a
//! [`CanonicalIdentifier`], the string used on the wire and for routing.
//!
//! # Canonical Form
//!
//! - A bare name `"X"` is equivalent to `{"channel": "X"}`.
//! - Object keys are sorted recursively, so field-for-field equal
//!   identifiers produce the same string regardless of construction order.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Key holding the channel class name.
const CHANNEL_KEY: &str = "channel";

// ============================================================================
// ChannelIdentifier
// ============================================================================

/// A channel name, optionally with parameters.
///
/// # Example
///
/// ```ignore
/// let chat = ChannelIdentifier::new("ChatChannel").param("room", 1);
/// assert_eq!(chat.canonicalize().as_str(), r#"{"channel":"ChatChannel","room":1}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelIdentifier {
    /// Bare channel name.
    Name(String),

    /// Channel name with parameters.
    Parameterized {
        /// Channel class name.
        channel: String,
        /// Extra parameters (never contains the `channel` key).
        params: Map<String, Value>,
    },
}

impl ChannelIdentifier {
    /// Creates a bare channel identifier.
    #[inline]
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self::Name(channel.into())
    }

    /// Adds a parameter, turning a bare name into a parameterized identifier.
    #[must_use]
    pub fn param(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let (channel, mut params) = match self {
            Self::Name(channel) => (channel, Map::new()),
            Self::Parameterized { channel, params } => (channel, params),
        };

        if key == CHANNEL_KEY {
            return match value.into() {
                Value::String(renamed) => Self::Parameterized {
                    channel: renamed,
                    params,
                },
                _ => Self::Parameterized { channel, params },
            };
        }

        params.insert(key, value.into());
        Self::Parameterized { channel, params }
    }

    /// Builds an identifier from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] unless the value is a string or
    /// an object with a string `channel` key.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::Name(name)),
            Value::Object(mut map) => match map.remove(CHANNEL_KEY) {
                Some(Value::String(channel)) => Ok(Self::Parameterized {
                    channel,
                    params: map,
                }),
                Some(other) => Err(Error::invalid_identifier(format!(
                    "`channel` must be a string, got {other}"
                ))),
                None => Err(Error::invalid_identifier("missing `channel` key")),
            },
            other => Err(Error::invalid_identifier(format!(
                "expected string or object, got {other}"
            ))),
        }
    }

    /// Returns the channel class name.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::Name(channel) | Self::Parameterized { channel, .. } => channel,
        }
    }

    /// Returns the identifier as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(CHANNEL_KEY.to_string(), Value::String(self.channel().to_string()));
        if let Self::Parameterized { params, .. } = self {
            for (key, value) in params {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Object(map)
    }

    /// Resolves the identifier into its canonical routing key.
    #[must_use]
    pub fn canonicalize(&self) -> CanonicalIdentifier {
        CanonicalIdentifier(canonical_json(&self.to_value()))
    }
}

impl From<&str> for ChannelIdentifier {
    fn from(channel: &str) -> Self {
        Self::new(channel)
    }
}

impl From<String> for ChannelIdentifier {
    fn from(channel: String) -> Self {
        Self::Name(channel)
    }
}

impl TryFrom<Value> for ChannelIdentifier {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl fmt::Display for ChannelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonicalize().as_str())
    }
}

// ============================================================================
// CanonicalIdentifier
// ============================================================================

/// Deterministic string form of a [`ChannelIdentifier`].
///
/// This is the `identifier` field of every envelope and the routing key of
/// the subscription registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalIdentifier(String);

impl CanonicalIdentifier {
    /// Normalizes an identifier string received from the wire.
    ///
    /// JSON input is re-serialized with sorted keys so that a server using
    /// a different key order still routes to the same subscriptions.
    /// Anything that is not a valid identifier is kept verbatim.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => match ChannelIdentifier::from_value(value) {
                Ok(identifier) => identifier.canonicalize(),
                Err(_) => Self(raw.to_string()),
            },
            _ => Self(raw.to_string()),
        }
    }

    /// Returns the canonical string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper, returning the string.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CanonicalIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ChannelIdentifier> for CanonicalIdentifier {
    fn from(identifier: &ChannelIdentifier) -> Self {
        identifier.canonicalize()
    }
}

// ============================================================================
// Canonical JSON
// ============================================================================

/// Serializes a JSON value with object keys sorted at every depth.
///
/// Does not depend on the `Map` ordering of `serde_json`, which changes
/// when the `preserve_order` feature is enabled anywhere in the build.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
