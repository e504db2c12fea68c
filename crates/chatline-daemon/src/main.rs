//! # chatline-daemon
//!
//! Headless chat client: keeps the realtime connection to a chat service
//! alive and mirrors chats and messages into the local SQLite cache.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatline_client::{ChatClient, ConnectionState, CredentialSignal, SessionContext, Signal};
use chatline_net::{HttpChatApi, WsTransport};
use chatline_shared::constants::CONNECT_TIMEOUT_SECS;
use chatline_store::{ChatStore, Database};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,chatline_client=debug,chatline_net=debug")
            }),
        )
        .init();

    info!("Starting chatline daemon v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DaemonConfig::from_env();
    info!(
        api = %config.api_url,
        ws = %config.ws_url,
        signed_in = config.auth_token.is_some(),
        platform = %config.platform,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the local store
    // -----------------------------------------------------------------------
    let store = match &config.db_path {
        Some(path) => ChatStore::open_at(path)?,
        None => ChatStore::new(Database::new()?),
    };

    // -----------------------------------------------------------------------
    // 4. Wire the client against the real endpoints
    // -----------------------------------------------------------------------
    let timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let credentials: CredentialSignal = Signal::new(config.credentials());
    // Always foregrounded; network loss surfaces as transport errors.
    let context = SessionContext::new(credentials.clone(), Signal::new(true), Signal::new(true));

    let api = Arc::new(HttpChatApi::new(&config.api_url, Arc::new(credentials), timeout)?);
    let transport = Arc::new(WsTransport::new(config.ws_url.clone(), timeout));

    let client = ChatClient::start(
        context,
        store,
        api,
        transport,
        config.client_config(),
        &config.platform,
    );

    if let Some(token) = config.push_token.clone() {
        if let Err(e) = client.push().on_token_refreshed(token).await {
            warn!(error = %e, "Failed to register push token");
        }
    }

    // -----------------------------------------------------------------------
    // 5. Run until Ctrl+C
    // -----------------------------------------------------------------------
    let mut states = client.connection().watch_state();
    let mut invalidations = client.connection().session_invalidations();

    loop {
        tokio::select! {
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                // Catch up on whatever was pushed while we were away.
                if state == ConnectionState::Connected {
                    if let Err(e) = client.chats().refresh_chats().await {
                        warn!(error = %e, "Chat list refresh failed");
                    }
                }
            }
            Ok(notice) = invalidations.recv() => {
                warn!(reason = %notice.reason, "Session rejected by server, signing out");
                client.context().credentials.set(None);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.shutdown().await;
    info!("chatline daemon stopped");
    Ok(())
}
