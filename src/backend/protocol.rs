//! Wire messages for the realtime voice-AI backend.
//!
//! Client messages are assembled as tagged JSON envelopes; server events are
//! discriminated by their `type` tag in [`crate::codec`]. The audio format
//! on both directions is `g711_ulaw`, matching the telephony side, so no
//! resampling happens anywhere in the bridge.

use base64::Engine;
use serde_json::json;

use crate::config::schema::BackendConfig;

/// Messages sent to the backend over an established link.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// One chunk of caller audio, appended to the backend's input buffer.
    AudioAppend { audio: Vec<u8> },
    /// Session configuration: agent persona, audio formats, VAD tuning.
    SessionSetup {
        instructions: String,
        voice: String,
        temperature: f32,
    },
    /// Ask the backend to start (or resume) responding.
    ResponseCreate,
    /// Cut short an in-flight agent utterance at `audio_end_ms`.
    Truncate { item_id: String, audio_end_ms: u64 },
    /// Liveness probe. Carried as a transport-level ping by the WebSocket
    /// link; acknowledged as [`BackendEvent::Keepalive`].
    Probe,
}

impl ClientMessage {
    /// Serialize to the backend's JSON envelope.
    ///
    /// [`ClientMessage::Probe`] has no JSON form (the transport maps it to
    /// a ping frame), so this returns `None` for it.
    pub fn to_json(&self) -> Option<String> {
        let value = match self {
            ClientMessage::AudioAppend { audio } => json!({
                "type": "input_audio_buffer.append",
                "audio": base64::engine::general_purpose::STANDARD.encode(audio),
            }),
            ClientMessage::SessionSetup {
                instructions,
                voice,
                temperature,
            } => json!({
                "type": "session.update",
                "session": {
                    "turn_detection": {
                        "type": "server_vad",
                        "threshold": 0.7,
                        "prefix_padding_ms": 300,
                        "silence_duration_ms": 700,
                    },
                    "input_audio_format": "g711_ulaw",
                    "output_audio_format": "g711_ulaw",
                    "voice": voice,
                    "instructions": instructions,
                    "modalities": ["text", "audio"],
                    "temperature": temperature,
                    "input_audio_transcription": {"model": "whisper-1"},
                }
            }),
            ClientMessage::ResponseCreate => json!({"type": "response.create"}),
            ClientMessage::Truncate {
                item_id,
                audio_end_ms,
            } => json!({
                "type": "conversation.item.truncate",
                "item_id": item_id,
                "content_index": 0,
                "audio_end_ms": audio_end_ms,
            }),
            ClientMessage::Probe => return None,
        };
        Some(value.to_string())
    }

    /// Build the session-setup message from backend configuration.
    pub fn session_setup(config: &BackendConfig) -> Self {
        ClientMessage::SessionSetup {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            temperature: config.temperature,
        }
    }
}

/// Events received from the backend, already discriminated by type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The backend accepted the session.
    SessionCreated,
    /// One chunk of synthesized agent audio (decoded from base64).
    AudioDelta {
        audio: Vec<u8>,
        item_id: Option<String>,
    },
    /// Final transcript of one agent utterance.
    AgentTranscript { text: String },
    /// Final transcript of one caller utterance.
    UserTranscript { text: String },
    /// The backend's VAD detected caller speech starting (barge-in signal).
    SpeechStarted,
    /// The backend's VAD detected caller speech ending.
    SpeechStopped,
    /// The agent finished its current response turn.
    ResponseDone,
    /// Acknowledgment of a liveness probe.
    Keepalive,
    /// Backend-reported error.
    Error { code: String, message: String },
    /// An event type this bridge does not handle. Logged and ignored.
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_append_envelope() {
        let msg = ClientMessage::AudioAppend {
            audio: vec![0xff, 0x7f, 0x00],
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        let b64 = json["audio"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        assert_eq!(decoded, vec![0xff, 0x7f, 0x00]);
    }

    #[test]
    fn test_session_setup_envelope() {
        let msg = ClientMessage::SessionSetup {
            instructions: "Be brief.".into(),
            voice: "echo".into(),
            temperature: 0.8,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "echo");
        assert_eq!(json["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(json["session"]["output_audio_format"], "g711_ulaw");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
    }

    #[test]
    fn test_truncate_envelope() {
        let msg = ClientMessage::Truncate {
            item_id: "item_42".into(),
            audio_end_ms: 1540,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "conversation.item.truncate");
        assert_eq!(json["item_id"], "item_42");
        assert_eq!(json["audio_end_ms"], 1540);
        assert_eq!(json["content_index"], 0);
    }

    #[test]
    fn test_probe_has_no_json_form() {
        assert!(ClientMessage::Probe.to_json().is_none());
    }

    #[test]
    fn test_response_create_envelope() {
        let json: serde_json::Value =
            serde_json::from_str(&ClientMessage::ResponseCreate.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "response.create");
    }
}
