//! Frame codec: telephony audio chunks to and from the backend wire format.
//!
//! Pure and stateless. The telephony side delivers fixed 20 ms chunks of
//! 8 kHz G.711 mu-law audio as base64 text; the backend expects the same
//! encoding wrapped in a JSON envelope, so the codec's job is framing and
//! text-transport encoding, never resampling.

use base64::Engine;
use serde_json::Value;

use crate::backend::protocol::{BackendEvent, ClientMessage};
use crate::errors::ProtocolError;

/// Wrap one mu-law audio chunk as a backend audio-append message.
pub fn encode_audio(chunk: &[u8]) -> ClientMessage {
    ClientMessage::AudioAppend {
        audio: chunk.to_vec(),
    }
}

/// Decode a base64 telephony media payload into raw audio bytes.
pub fn decode_payload(b64: &str) -> Result<Vec<u8>, ProtocolError> {
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| ProtocolError::BadPayload(e.to_string()))
}

/// Encode raw audio bytes as a base64 telephony media payload.
pub fn encode_payload(chunk: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(chunk)
}

/// Decode one backend JSON event into a typed [`BackendEvent`].
///
/// Audio payloads are discriminated from control events by the `type` tag.
/// Unknown tags decode to [`BackendEvent::Other`] so callers can log and
/// ignore them; only malformed frames produce an error, and those are also
/// dropped by callers rather than tearing the link down.
pub fn decode_event(text: &str) -> Result<BackendEvent, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let event_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingField("type"))?;

    let event = match event_type {
        "session.created" => BackendEvent::SessionCreated,
        "response.audio.delta" => {
            let delta = value
                .get("delta")
                .and_then(|v| v.as_str())
                .ok_or(ProtocolError::MissingField("delta"))?;
            let audio = decode_payload(delta)?;
            let item_id = value
                .get("item_id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            BackendEvent::AudioDelta { audio, item_id }
        }
        "response.audio_transcript.done" => BackendEvent::AgentTranscript {
            text: value
                .get("transcript")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        },
        "conversation.item.input_audio_transcription.completed" => BackendEvent::UserTranscript {
            text: value
                .get("transcript")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        },
        "input_audio_buffer.speech_started" => BackendEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => BackendEvent::SpeechStopped,
        "response.done" => BackendEvent::ResponseDone,
        "pong" => BackendEvent::Keepalive,
        "error" => {
            let error = value.get("error").cloned().unwrap_or(Value::Null);
            BackendEvent::Error {
                code: error
                    .get("code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                message: error
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            }
        }
        other => BackendEvent::Other(other.to_string()),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_audio_round_trips_through_envelope() {
        let chunk: Vec<u8> = (0..160).map(|i| i as u8).collect();
        let msg = encode_audio(&chunk);
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let decoded = decode_payload(json["audio"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_decode_audio_delta() {
        let payload = encode_payload(&[1, 2, 3, 4]);
        let text = format!(
            r#"{{"type": "response.audio.delta", "delta": "{}", "item_id": "item_7"}}"#,
            payload
        );
        match decode_event(&text).unwrap() {
            BackendEvent::AudioDelta { audio, item_id } => {
                assert_eq!(audio, vec![1, 2, 3, 4]);
                assert_eq!(item_id.as_deref(), Some("item_7"));
            }
            other => panic!("Expected AudioDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_transcripts() {
        let agent = decode_event(
            r#"{"type": "response.audio_transcript.done", "transcript": "Hello there"}"#,
        )
        .unwrap();
        assert_eq!(
            agent,
            BackendEvent::AgentTranscript {
                text: "Hello there".into()
            }
        );

        let user = decode_event(
            r#"{"type": "conversation.item.input_audio_transcription.completed", "transcript": "hi"}"#,
        )
        .unwrap();
        assert_eq!(user, BackendEvent::UserTranscript { text: "hi".into() });
    }

    #[test]
    fn test_decode_speech_and_turn_events() {
        assert_eq!(
            decode_event(r#"{"type": "input_audio_buffer.speech_started"}"#).unwrap(),
            BackendEvent::SpeechStarted
        );
        assert_eq!(
            decode_event(r#"{"type": "input_audio_buffer.speech_stopped"}"#).unwrap(),
            BackendEvent::SpeechStopped
        );
        assert_eq!(
            decode_event(r#"{"type": "response.done"}"#).unwrap(),
            BackendEvent::ResponseDone
        );
    }

    #[test]
    fn test_decode_error_event() {
        let e = decode_event(
            r#"{"type": "error", "error": {"code": "rate_limit_exceeded", "message": "slow down"}}"#,
        )
        .unwrap();
        assert_eq!(
            e,
            BackendEvent::Error {
                code: "rate_limit_exceeded".into(),
                message: "slow down".into()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let e = decode_event(r#"{"type": "rate_limits.updated", "rate_limits": []}"#).unwrap();
        assert_eq!(e, BackendEvent::Other("rate_limits.updated".into()));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            decode_event("{not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_missing_type_tag_is_error() {
        assert!(matches!(
            decode_event(r#"{"event": "media"}"#),
            Err(ProtocolError::MissingField("type"))
        ));
    }

    #[test]
    fn test_audio_delta_with_bad_base64_is_error() {
        let text = r#"{"type": "response.audio.delta", "delta": "!!!not-base64!!!"}"#;
        assert!(matches!(
            decode_event(text),
            Err(ProtocolError::BadPayload(_))
        ));
    }
}
