//! chat-socket CLI - connect to a chat backend and print what happens.
//!
//! Logs every state change, event and error until Ctrl-C, then
//! disconnects gracefully.

use std::sync::Arc;

use anyhow::{Context, Result};
use chat_socket::{
    ApplicationEvent, ChatError, ClientConfig, ConnectionConfig, ConnectionManager,
    ConnectionState, SocketListener, User,
};
use clap::Parser;
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long to wait for the close handshake on Ctrl-C.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

// CLI
#[derive(Parser)]
#[command(name = "chat-socket")]
#[command(version)]
#[command(about = "Persistent WebSocket connection to a chat backend")]
struct Cli {
    /// Backend URL (overrides config and CHAT_SOCKET_WS_URL)
    #[arg(long)]
    url: Option<String>,

    /// Application API key (overrides config and CHAT_SOCKET_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// User id to connect as
    #[arg(long, required_unless_present = "anonymous")]
    user_id: Option<String>,

    /// JWT for the user
    #[arg(long, required_unless_present = "anonymous")]
    token: Option<String>,

    /// Connect anonymously instead of as a user
    #[arg(long, conflicts_with_all = ["user_id", "token"])]
    anonymous: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

/// Listener that logs everything it sees.
struct LogListener;

impl SocketListener for LogListener {
    fn on_state_changed(&self, state: &ConnectionState) {
        println!("state: {state}");
    }

    fn on_event(&self, event: &ApplicationEvent) {
        println!("event: {} {}", event.event_type, event.payload);
    }

    fn on_error(&self, error: &ChatError) {
        println!("error: {error} ({:?})", error.kind());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut client = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        client.ws_url = url;
    }
    if let Some(api_key) = cli.api_key {
        client.api_key = api_key;
    }

    if cli.save_config {
        client.save().context("Failed to save configuration")?;
        println!("Configuration saved to {}", ClientConfig::config_dir()?.display());
        return Ok(());
    }

    let connection = if cli.anonymous {
        ConnectionConfig::anonymous()
    } else {
        let user_id = cli.user_id.context("--user-id is required")?;
        let token = cli.token.context("--token is required")?;
        ConnectionConfig::user(User::new(user_id), token)
    };

    log::info!("chat-socket v{} connecting to {}", env!("CARGO_PKG_VERSION"), client.ws_url);

    let manager = ConnectionManager::with_websocket(client);
    manager.add_listener(Arc::new(LogListener));
    manager.connect(connection);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Shutting down...");
    manager.disconnect();
    manager.shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    Ok(())
}
