//! Core bot infrastructure: shared context, gateway bridge, and event loop.
//!
//! This module connects to Discord's gateway, pulls events off the driver's
//! channel and dispatches them to the functions in [`crate::handlers`].

use std::sync::Arc;
use std::time::Instant;

use async_lock::Mutex;
use tracing::{info, trace, warn};

use crate::catalog::CatalogStore;
use crate::config::ConfigError;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayError};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::loader::LoadFailure;
use crate::types::Intents;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("catalog source error: {0}")]
    Load(#[from] LoadFailure),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("gateway driver task failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
    #[error("keep-alive endpoint error: {0}")]
    KeepAlive(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Bot identity and lifecycle state.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<String>,
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            start_time: Instant::now(),
        }
    }
}

/// Everything a handler needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub http: DiscordHttpClient,
    pub store: Arc<CatalogStore>,
    pub state: Arc<Mutex<BotState>>,
}

impl BotContext {
    pub fn new(http: DiscordHttpClient, store: Arc<CatalogStore>) -> Self {
        Self {
            http,
            store,
            state: Arc::new(Mutex::new(BotState::default())),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway intents
// ---------------------------------------------------------------------------

/// Guild message events with their text content.
pub fn gateway_intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT
}

// ---------------------------------------------------------------------------
// Bot entry point
// ---------------------------------------------------------------------------

/// Connect to the gateway and run the event loop until the driver stops.
///
/// Returns `Ok(())` only if the event stream ends cleanly; a fatal close
/// code or exhausted reconnects come back as [`BotError::Gateway`].
pub async fn start(token: &str, store: Arc<CatalogStore>) -> Result<(), BotError> {
    let ctx = BotContext::new(DiscordHttpClient::new(token), store);

    let gw = gateway::connect(GatewayConfig {
        token: token.to_string(),
        intents: gateway_intents(),
        shard: None,
    });

    info!("gateway driver started, entering event loop");

    while let Ok(event) = gw.events.recv().await {
        dispatch(&ctx, event).await;
    }

    let uptime = ctx.state.lock().await.start_time.elapsed();
    warn!(
        uptime_s = uptime.as_secs(),
        "event stream ended, waiting for gateway driver"
    );
    gw.driver_handle.await??;
    Ok(())
}

async fn dispatch(ctx: &BotContext, event: GatewayEvent) {
    match event {
        GatewayEvent::Ready(ready) => handlers::on_ready(ctx, &ready).await,

        GatewayEvent::MessageCreate(msg) => handlers::on_message(ctx, &msg).await,

        // Session plumbing is handled inside the gateway driver.
        GatewayEvent::HeartbeatRequest
        | GatewayEvent::HeartbeatAck
        | GatewayEvent::Reconnect
        | GatewayEvent::InvalidSession(_) => {}

        GatewayEvent::Unknown { op, event_name } => {
            trace!(op, event = ?event_name, "unhandled gateway event");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
