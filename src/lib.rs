//! Discord bot that picks a random rhythm-game chart, optionally filtered by
//! difficulty tier and level.
//!
//! The core (catalog, command grammar, selection, refresh scheduling, reply
//! rendering) is always compiled. The `io` feature adds the Discord gateway
//! and REST client, environment config, the HTTP catalog source and the
//! keep-alive endpoint, and wires them together in [`run`].

pub mod catalog;
pub mod command;
pub mod events;
pub mod loader;
pub mod refresh;
pub mod render;
pub mod selector;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod config;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod handlers;
#[cfg(feature = "io")]
pub mod http;
#[cfg(feature = "io")]
pub mod keepalive;

#[cfg(feature = "io")]
pub use self::io::run;

#[cfg(feature = "io")]
mod io {
    use std::sync::Arc;

    use tracing::info;

    use crate::bot::{self, BotError};
    use crate::catalog::CatalogStore;
    use crate::config::Config;
    use crate::keepalive;
    use crate::loader::{CatalogLoader, HttpCatalogSource};
    use crate::refresh::RefreshScheduler;

    /// Run the bot until the gateway stops.
    ///
    /// Loads config, performs one catalog load before connecting (so the
    /// first commands already have data), then starts the keep-alive
    /// endpoint, the refresh loop and the gateway event loop.
    pub async fn run() -> Result<(), BotError> {
        let config = Config::from_env()?;
        info!(config = ?config, "configuration loaded");

        let store = Arc::new(CatalogStore::new());
        let source = HttpCatalogSource::new(config.catalog_url.clone())?;
        let scheduler = RefreshScheduler::new(
            CatalogLoader::new(source),
            Arc::clone(&store),
            config.refresh_interval,
        );

        let initial = scheduler.refresh_once().await;
        if !initial.is_committed() {
            info!("starting with an empty catalog; commands will report it as loading");
        }

        let keepalive = match config.keepalive_port {
            Some(port) => {
                let listener = keepalive::bind(port).await.map_err(BotError::KeepAlive)?;
                Some(keepalive::serve(listener))
            }
            None => None,
        };
        let refresher = scheduler.spawn();

        let result = bot::start(&config.token, store).await;

        refresher.abort();
        if let Some(handle) = keepalive {
            handle.abort();
        }
        result
    }
}
