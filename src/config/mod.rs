//! Bridge configuration: schema and JSON file loading.

pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    BackendConfig, BridgeConfig, CredentialConfig, DrainPolicy, HeartbeatConfig, ReconnectConfig,
    ServerConfig, SessionConfig,
};
