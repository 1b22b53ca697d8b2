//! Configuration loading and saving utilities.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::schema::BridgeConfig;

/// Get the default configuration file path (`~/.voxbridge/config.json`).
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".voxbridge").join("config.json")
}

/// Load configuration from a file, or return a default [`BridgeConfig`] if
/// the file does not exist or cannot be parsed.
///
/// If `config_path` is `None`, the default path (`~/.voxbridge/config.json`)
/// is used.
pub fn load_config(config_path: Option<&Path>) -> BridgeConfig {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BridgeConfig>(&contents) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        "Failed to parse config from {}: {}. Using default configuration.",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read config from {}: {}. Using default configuration.",
                    path.display(),
                    e
                );
            }
        }
    }

    BridgeConfig::default()
}

/// Save configuration to a JSON file, creating parent directories as needed.
pub fn save_config(config: &BridgeConfig, config_path: Option<&Path>) {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            if let Err(e) = fs::write(&path, json) {
                warn!("Failed to write config to {}: {}", path.display(), e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize config: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let cfg = load_config(Some(&path));
        assert_eq!(cfg.server.port, 5000);
    }

    #[test]
    fn test_load_corrupt_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let cfg = load_config(Some(&path));
        assert_eq!(cfg.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = BridgeConfig::default();
        cfg.server.port = 9100;
        cfg.session.outbound_buffer_frames = 64;
        save_config(&cfg, Some(&path));

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.server.port, 9100);
        assert_eq!(loaded.session.outbound_buffer_frames, 64);
    }
}
