//! Envelope codec.
//!
//! Pure functions converting envelopes to and from wire text. Decoding
//! failures are reported as [`Error::Decode`] so callers can drop the frame
//! without tearing down the connection.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::from_str;

use crate::error::{Error, Result};

use super::envelope::{InboundEnvelope, OutboundEnvelope, RawInbound};

// ============================================================================
// Encoding
// ============================================================================

/// Encodes any envelope into wire text.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode<T: Serialize>(envelope: &T) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a server frame.
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed JSON or frames missing required
/// fields.
pub fn decode_inbound(text: &str) -> Result<InboundEnvelope> {
    let raw: RawInbound =
        from_str(text).map_err(|e| Error::decode(format!("malformed inbound frame: {e}")))?;
    InboundEnvelope::try_from(raw)
}

/// Decodes a client command, as seen by the server side of the transport.
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed JSON or unknown commands.
pub fn decode_outbound(text: &str) -> Result<OutboundEnvelope> {
    from_str(text).map_err(|e| Error::decode(format!("malformed outbound frame: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    use crate::protocol::{ChannelIdentifier, PongFrame};

    #[test]
    fn test_encode_subscribe() {
        let id = ChannelIdentifier::new("ChatChannel").param("room", 1).canonicalize();
        let text = encode(&OutboundEnvelope::subscribe(&id)).unwrap();
        assert_eq!(
            text,
            r#"{"command":"subscribe","identifier":"{\"channel\":\"ChatChannel\",\"room\":1}"}"#
        );
    }

    #[test]
    fn test_decode_outbound_message() {
        let text = r#"{"command":"message","identifier":"{\"channel\":\"Chat\"}","data":"{\"action\":\"speak\",\"message\":\"hi\"}"}"#;
        let envelope = decode_outbound(text).unwrap();
        assert_eq!(envelope.command(), "message");
        assert_eq!(
            envelope.data(),
            Some(json!({ "action": "speak", "message": "hi" }))
        );
    }

    #[test]
    fn test_decode_outbound_unknown_command() {
        let err = decode_outbound(r#"{"command":"explode","identifier":"x"}"#).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_welcome() {
        assert_eq!(
            decode_inbound(r#"{"type":"welcome"}"#).unwrap(),
            InboundEnvelope::Welcome
        );
    }

    #[test]
    fn test_decode_ping() {
        assert_eq!(
            decode_inbound(r#"{"type":"ping","message":1700000000}"#).unwrap(),
            InboundEnvelope::Ping {
                message: json!(1_700_000_000)
            }
        );
    }

    #[test]
    fn test_decode_confirm_normalizes_identifier() {
        let text = r#"{"type":"confirm_subscription","identifier":"{\"room\":1,\"channel\":\"Chat\"}"}"#;
        let expected = ChannelIdentifier::new("Chat").param("room", 1).canonicalize();
        assert_eq!(
            decode_inbound(text).unwrap(),
            InboundEnvelope::ConfirmSubscription {
                identifier: expected
            }
        );
    }

    #[test]
    fn test_decode_reject_requires_identifier() {
        let err = decode_inbound(r#"{"type":"reject_subscription"}"#).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_disconnect() {
        let envelope =
            decode_inbound(r#"{"type":"disconnect","reason":"server_restart","reconnect":true}"#)
                .unwrap();
        assert_eq!(
            envelope,
            InboundEnvelope::Disconnect {
                reason: Some("server_restart".into()),
                reconnect: true
            }
        );
    }

    #[test]
    fn test_decode_data_message() {
        let text = r#"{"identifier":"{\"channel\":\"Chat\"}","message":{"text":"hi"}}"#;
        match decode_inbound(text).unwrap() {
            InboundEnvelope::Message { message, .. } => assert_eq!(message, json!({ "text": "hi" })),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_data_message_with_null_payload() {
        let text = r#"{"identifier":"{\"channel\":\"Chat\"}","message":null}"#;
        assert_eq!(
            decode_inbound(text).unwrap(),
            InboundEnvelope::Message {
                identifier: ChannelIdentifier::new("Chat").canonicalize(),
                message: Value::Null,
            }
        );
    }

    #[test]
    fn test_decode_data_message_requires_payload_field() {
        let err = decode_inbound(r#"{"identifier":"{\"channel\":\"Chat\"}"}"#).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_inbound(r#"{"type":"presence"}"#).unwrap(),
            InboundEnvelope::Unknown {
                kind: "presence".into()
            }
        );
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(decode_inbound("{not json").unwrap_err().is_decode_error());
        assert!(decode_inbound("[1,2]").unwrap_err().is_decode_error());
    }

    #[test]
    fn test_encode_pong() {
        assert_eq!(
            encode(&PongFrame::echo(json!(5))).unwrap(),
            r#"{"type":"pong","message":5}"#
        );
    }
}
