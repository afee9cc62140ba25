use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use strife_protocol::opcodes::Channel;
use tokio::net::TcpListener;
use tracing::info;

mod blob;
mod channel;
mod config;
mod dispatcher;
mod handlers;
mod registry;
mod settings;
mod state;
mod store;

use blob::Blob;
use config::ServerConfig;
use settings::ServerSettings;
use state::AppState;
use store::Store;

#[derive(Parser)]
#[command(name = "strife-server", about = "Strife multi-user encrypted chat server")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address (IP), overrides config
    #[arg(long)]
    host: Option<String>,

    /// General channel TCP port, overrides config
    #[arg(long)]
    general_port: Option<u16>,

    /// Chats channel TCP port, overrides config
    #[arg(long)]
    chats_port: Option<u16>,

    /// Files channel TCP port, overrides config
    #[arg(long)]
    files_port: Option<u16>,

    /// Path to server settings file (JSON)
    #[arg(long)]
    settings: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strife_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path))?;
        toml::from_str(&content)?
    } else {
        ServerConfig::default()
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.general_port {
        config.general_port = port;
    }
    if let Some(port) = args.chats_port {
        config.chats_port = port;
    }
    if let Some(port) = args.files_port {
        config.files_port = port;
    }

    let settings = if let Some(settings_path) = &args.settings {
        ServerSettings::load_from_file(std::path::Path::new(settings_path))
            .with_context(|| format!("failed to load settings: {}", settings_path))?
    } else if std::path::Path::new("server_settings.json").exists() {
        ServerSettings::load_from_file(std::path::Path::new("server_settings.json"))
            .context("failed to load server_settings.json")?
    } else {
        ServerSettings::default()
    };

    info!(
        host = %config.host,
        general_port = config.general_port,
        chats_port = config.chats_port,
        files_port = config.files_port,
        "strife-server starting",
    );

    let store = Store::connect(&config.db_path).await.context("failed to open database")?;
    let blob = Blob::initialize(&config.blob_dir).await.context("failed to initialize blob storage")?;

    let general_listener = TcpListener::bind((config.host.as_str(), config.general_port))
        .await
        .with_context(|| format!("failed to bind general channel on {}:{}", config.host, config.general_port))?;
    let chats_listener = TcpListener::bind((config.host.as_str(), config.chats_port))
        .await
        .with_context(|| format!("failed to bind chats channel on {}:{}", config.host, config.chats_port))?;
    let files_listener = TcpListener::bind((config.host.as_str(), config.files_port))
        .await
        .with_context(|| format!("failed to bind files channel on {}:{}", config.host, config.files_port))?;

    let (general, general_rx) =
        channel::spawn_listener(Channel::General, general_listener).context("failed to start general channel")?;
    let (chats, chats_rx) =
        channel::spawn_listener(Channel::Chats, chats_listener).context("failed to start chats channel")?;
    let (files, files_rx) =
        channel::spawn_listener(Channel::Files, files_listener).context("failed to start files channel")?;

    let app_state = Arc::new(AppState::new(store, blob, settings, general, chats, files));

    dispatcher::spawn_dispatcher(app_state.clone(), Channel::General, general_rx);
    dispatcher::spawn_dispatcher(app_state.clone(), Channel::Chats, chats_rx);
    dispatcher::spawn_dispatcher(app_state, Channel::Files, files_rx);

    info!("server ready, accepting connections on all three channels");
    std::future::pending::<()>().await;
    Ok(())
}
