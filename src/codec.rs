//! Frame encoding and decoding for the market-data WebSocket protocol.
//!
//! [`MessageCodec::decode`] is total: a frame that fails schema validation
//! becomes an [`InboundEvent::ParseError`] carrying the raw payload and a
//! diagnostic, so a malformed message can never crash the stream.

use serde_json::Value;

use crate::models::{BookUpdate, InboundEvent, OutboundCommand};

/// Stateless codec for the text-frame wire format.
///
/// Inbound frames are JSON objects; one with `tradingPair`, `bids`, and
/// `asks` is an order-book update, one with a `type` tag of `"info"` or
/// `"error"` is a notice, anything else is malformed.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes an outbound command.
    ///
    /// Total for all command variants: the frame is built from plain
    /// strings, so serialization cannot fail.
    #[must_use]
    pub fn encode(command: &OutboundCommand) -> String {
        serde_json::json!({
            "action": command.action(),
            "tradingPair": command.trading_pair(),
        })
        .to_string()
    }

    /// Parses a raw text frame into a typed event.
    #[must_use]
    pub fn decode(raw: &str) -> InboundEvent {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return InboundEvent::ParseError {
                    raw: raw.to_string(),
                    detail: format!("invalid json: {e}"),
                };
            }
        };

        if value.get("tradingPair").is_some()
            && value.get("bids").is_some()
            && value.get("asks").is_some()
        {
            return match serde_json::from_value::<BookUpdate>(value) {
                Ok(update) => InboundEvent::Book(update),
                Err(e) => InboundEvent::ParseError {
                    raw: raw.to_string(),
                    detail: format!("malformed book frame: {e}"),
                },
            };
        }

        if let Some(tag) = value.get("type").and_then(Value::as_str) {
            let payload = value.get("payload").map(payload_text).unwrap_or_default();
            return match tag {
                "info" => InboundEvent::Info(payload),
                "error" => InboundEvent::ServerError(payload),
                other => InboundEvent::ParseError {
                    raw: raw.to_string(),
                    detail: format!("unknown frame type {other:?}"),
                },
            };
        }

        InboundEvent::ParseError {
            raw: raw.to_string(),
            detail: "frame matches no known schema".to_string(),
        }
    }
}

/// Renders a notice payload for display: strings as-is, anything else as
/// compact JSON.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
