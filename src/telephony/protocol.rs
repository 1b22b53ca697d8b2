//! JSON envelopes for the telephony media-stream boundary.
//!
//! The provider sends one JSON object per WebSocket text frame, tagged by an
//! `event` field. Inbound frames carry caller audio and stream lifecycle
//! events; outbound frames mirror the same envelope shape to deliver agent
//! audio, playback marks, and the clear command used for barge-in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound frames (provider -> bridge)
// ---------------------------------------------------------------------------

/// Metadata delivered with the `start` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMeta {
    /// Resolve the call id, preferring an explicit custom parameter over the
    /// stream-level field.
    pub fn call_id(&self) -> Option<&str> {
        self.custom_parameters
            .get("CallSid")
            .map(String::as_str)
            .or(self.call_sid.as_deref())
    }
}

/// Payload of a `media` event: base64 audio plus the provider's stream clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub payload: String,
    /// Milliseconds since stream start, transported as a string.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MediaPayload {
    /// Stream clock in milliseconds, zero when absent or unparsable.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
    }
}

/// Payload of a `mark` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// A frame received from the telephony media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Handshake preamble, sent before `start`. No content the bridge needs.
    Connected,
    /// Stream opened; identifies the call.
    Start { start: StartMeta },
    /// One chunk of caller audio.
    Media { media: MediaPayload },
    /// Acknowledgment that previously sent agent audio reached playback.
    Mark { mark: MarkPayload },
    /// Stream closed; the call has ended.
    Stop,
}

// ---------------------------------------------------------------------------
// Outbound frames (bridge -> provider)
// ---------------------------------------------------------------------------

/// Media payload sent back to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

/// A frame sent to the telephony media stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// One chunk of agent audio.
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Playback tracking mark; echoed back as an inbound `mark` once the
    /// audio sent before it has played.
    #[serde(rename_all = "camelCase")]
    Mark {
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Discard any audio the provider has buffered but not yet played.
    /// Sent exactly once per barge-in.
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, payload_b64: String) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload_b64,
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_frame() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ0001",
                "callSid": "CA0001",
                "customParameters": {"CallSid": "CA9999"}
            }
        }"#;
        let frame: InboundFrame = serde_json::from_str(text).unwrap();
        match frame {
            InboundFrame::Start { start } => {
                assert_eq!(start.stream_sid, "MZ0001");
                // Custom parameter wins over the stream-level field.
                assert_eq!(start.call_id(), Some("CA9999"));
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_start_without_custom_parameters_uses_call_sid() {
        let text = r#"{"event": "start", "start": {"streamSid": "MZ1", "callSid": "CA1"}}"#;
        let frame: InboundFrame = serde_json::from_str(text).unwrap();
        match frame {
            InboundFrame::Start { start } => assert_eq!(start.call_id(), Some("CA1")),
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_frame() {
        let text = r#"{"event": "media", "media": {"payload": "AAAA", "timestamp": "1234"}}"#;
        let frame: InboundFrame = serde_json::from_str(text).unwrap();
        match frame {
            InboundFrame::Media { media } => {
                assert_eq!(media.payload, "AAAA");
                assert_eq!(media.timestamp_ms(), 1234);
            }
            other => panic!("Expected Media, got {:?}", other),
        }
    }

    #[test]
    fn test_media_timestamp_defaults_to_zero() {
        let text = r#"{"event": "media", "media": {"payload": "AAAA"}}"#;
        let frame: InboundFrame = serde_json::from_str(text).unwrap();
        match frame {
            InboundFrame::Media { media } => assert_eq!(media.timestamp_ms(), 0),
            other => panic!("Expected Media, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stop_ignores_extra_fields() {
        let text = r#"{"event": "stop", "stop": {"accountSid": "AC1"}}"#;
        let frame: InboundFrame = serde_json::from_str(text).unwrap();
        assert!(matches!(frame, InboundFrame::Stop));
    }

    #[test]
    fn test_unknown_event_fails_to_parse() {
        let text = r#"{"event": "dtmf", "dtmf": {"digit": "5"}}"#;
        assert!(serde_json::from_str::<InboundFrame>(text).is_err());
    }

    #[test]
    fn test_outbound_media_envelope() {
        let frame = OutboundFrame::media("MZ7", "QUJD".into());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ7");
        assert_eq!(json["media"]["payload"], "QUJD");
    }

    #[test]
    fn test_outbound_clear_envelope() {
        let frame = OutboundFrame::clear("MZ7");
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["event"], "clear");
        assert_eq!(json["streamSid"], "MZ7");
    }

    #[test]
    fn test_outbound_mark_envelope() {
        let frame = OutboundFrame::mark("MZ7", "responsePart");
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["event"], "mark");
        assert_eq!(json["mark"]["name"], "responsePart");
    }
}
