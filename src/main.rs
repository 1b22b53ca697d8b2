//! voxbridge - real-time voice session bridge for AI phone agents.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use voxbridge::config::{load_config, save_config};
use voxbridge::session::LogObserver;
use voxbridge::telephony::BridgeServer;

#[derive(Parser)]
#[command(
    name = "voxbridge",
    about = "voxbridge - realtime voice session bridge",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the media-stream bridge server.
    Serve {
        /// Path to the JSON config file (default: ~/.voxbridge/config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured listen port.
        #[arg(short, long)]
        port: Option<u16>,
        /// Verbose logging.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Validate the config file and print the effective configuration.
    CheckConfig {
        /// Path to the JSON config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default config file for editing.
    Init {
        /// Path to write (default: ~/.voxbridge/config.json).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            verbose,
        } => {
            init_tracing(verbose);

            let mut cfg = load_config(config.as_deref());
            if let Some(port) = port {
                cfg.server.port = port;
            }

            let server = BridgeServer::new(cfg, Arc::new(LogObserver));
            server.start().await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            server.stop();
            Ok(())
        }
        Commands::CheckConfig { config } => {
            init_tracing(false);
            let cfg = load_config(config.as_deref());
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
        Commands::Init { config } => {
            init_tracing(false);
            let cfg = voxbridge::config::BridgeConfig::default();
            save_config(&cfg, config.as_deref());
            let path = config.unwrap_or_else(voxbridge::config::get_config_path);
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}
