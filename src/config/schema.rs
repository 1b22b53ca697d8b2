//! Configuration schema for voxbridge.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so that the JSON
//! config file can use camelCase keys while Rust code uses snake_case
//! fields. Every knob is consumed at session creation; nothing is read from
//! global mutable state mid-call.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Server config
// ---------------------------------------------------------------------------

/// Listener configuration for the telephony media-stream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend config
// ---------------------------------------------------------------------------

/// How the backend connection is authenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CredentialConfig {
    /// Long-lived key sent as a bearer header on the WebSocket handshake.
    #[serde(rename_all = "camelCase")]
    ApiKey { key: String },
    /// Short-lived signed connection URL minted by an HTTP endpoint.
    #[serde(rename_all = "camelCase")]
    SignedUrl {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
}

impl Default for CredentialConfig {
    fn default() -> Self {
        CredentialConfig::ApiKey { key: String::new() }
    }
}

/// Voice-AI backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// WebSocket URL of the realtime endpoint (ignored when the credential
    /// mints its own signed URL).
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub credential: CredentialConfig,
    /// Extra headers for the WebSocket handshake (protocol version tags
    /// and the like).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// System instructions for the voice agent.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_instructions() -> String {
    "You are a helpful AI receptionist. Greet callers warmly, answer \
     questions about the business, and help with appointments. Be friendly, \
     professional, and concise. Keep responses to 1-2 sentences."
        .to_string()
}

fn default_voice() -> String {
    "echo".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_connect_timeout_s() -> u64 {
    30
}

fn default_send_timeout_ms() -> u64 {
    5000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            credential: CredentialConfig::default(),
            extra_headers: HashMap::new(),
            instructions: default_instructions(),
            voice: default_voice(),
            temperature: default_temperature(),
            connect_timeout_s: default_connect_timeout_s(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervision config
// ---------------------------------------------------------------------------

/// Liveness probing on an established backend link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Seconds between probes.
    #[serde(default = "default_heartbeat_interval_s")]
    pub interval_s: u64,
    /// Seconds to wait for an acknowledgment before declaring the link dead.
    #[serde(default = "default_heartbeat_deadline_s")]
    pub deadline_s: u64,
}

fn default_heartbeat_interval_s() -> u64 {
    20
}

fn default_heartbeat_deadline_s() -> u64 {
    10
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_s: default_heartbeat_interval_s(),
            deadline_s: default_heartbeat_deadline_s(),
        }
    }
}

/// Bounded-retry backoff for replacing a lost backend link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session config
// ---------------------------------------------------------------------------

/// What the caller hears when the backend stays unreachable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "camelCase")]
pub enum DrainPolicy {
    /// End the call with a clean telephony-level termination.
    #[default]
    Hangup,
    /// Stream a pre-rendered mu-law announcement before hanging up.
    #[serde(rename_all = "camelCase")]
    Announce { audio_file: PathBuf },
}

/// Per-call session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Hard cap on call length; the session closes when it expires even if
    /// both links are healthy.
    #[serde(default = "default_max_call_duration_s")]
    pub max_call_duration_s: u64,
    /// Frames buffered for the backend while it is unreachable. Oldest
    /// frames are dropped once full.
    #[serde(default = "default_outbound_buffer_frames")]
    pub outbound_buffer_frames: usize,
    /// Window after stream start during which barge-in signals are ignored,
    /// so line noise cannot cut off the greeting.
    #[serde(default = "default_interruption_guard_ms")]
    pub interruption_guard_ms: u64,
    #[serde(default)]
    pub drain: DrainPolicy,
}

fn default_max_call_duration_s() -> u64 {
    3600
}

fn default_outbound_buffer_frames() -> usize {
    256
}

fn default_interruption_guard_ms() -> u64 {
    3000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_call_duration_s: default_max_call_duration_s(),
            outbound_buffer_frames: default_outbound_buffer_frames(),
            interruption_guard_ms: default_interruption_guard_ms(),
            drain: DrainPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

/// Root configuration for the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.heartbeat.interval_s, 20);
        assert_eq!(cfg.heartbeat.deadline_s, 10);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.base_delay_ms, 1000);
        assert_eq!(cfg.session.max_call_duration_s, 3600);
        assert_eq!(cfg.session.outbound_buffer_frames, 256);
        assert_eq!(cfg.session.interruption_guard_ms, 3000);
        assert!(matches!(cfg.session.drain, DrainPolicy::Hangup));
    }

    #[test]
    fn test_camel_case_keys() {
        let json = r#"{
            "server": {"host": "127.0.0.1", "port": 8080},
            "reconnect": {"maxAttempts": 5, "baseDelayMs": 250},
            "session": {"maxCallDurationS": 120}
        }"#;
        let cfg: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.reconnect.base_delay_ms, 250);
        assert_eq!(cfg.session.max_call_duration_s, 120);
        // Unspecified sections fall back to defaults.
        assert_eq!(cfg.heartbeat.interval_s, 20);
    }

    #[test]
    fn test_credential_tagged_forms() {
        let key: CredentialConfig =
            serde_json::from_str(r#"{"kind": "apiKey", "key": "sk-test"}"#).unwrap();
        assert!(matches!(key, CredentialConfig::ApiKey { .. }));

        let signed: CredentialConfig = serde_json::from_str(
            r#"{"kind": "signedUrl", "endpoint": "https://example.com/token"}"#,
        )
        .unwrap();
        match signed {
            CredentialConfig::SignedUrl { endpoint, api_key } => {
                assert_eq!(endpoint, "https://example.com/token");
                assert!(api_key.is_none());
            }
            _ => panic!("Expected SignedUrl"),
        }
    }

    #[test]
    fn test_drain_policy_announce() {
        let drain: DrainPolicy = serde_json::from_str(
            r#"{"policy": "announce", "audioFile": "/var/lib/voxbridge/fallback.ulaw"}"#,
        )
        .unwrap();
        match drain {
            DrainPolicy::Announce { audio_file } => {
                assert!(audio_file.ends_with("fallback.ulaw"));
            }
            _ => panic!("Expected Announce"),
        }
    }

    #[test]
    fn test_config_round_trip() {
        let cfg = BridgeConfig::default();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.host, cfg.server.host);
        assert_eq!(parsed.backend.voice, "echo");
    }
}
