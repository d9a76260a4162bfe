//! Periodic catalog refresh.
//!
//! The scheduler is the only writer to the [`CatalogStore`]. It commits a
//! freshly loaded catalog only when the load succeeded and produced at least
//! one entry; otherwise the previous catalog stays in place.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::loader::{CatalogLoader, CatalogSource, LoadFailure};

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A non-empty catalog was committed.
    Committed { entries: usize, revision: u64 },
    /// The source was reachable but yielded no valid entries. Not committed.
    Empty,
    /// The load failed. Not committed.
    Failed(LoadFailure),
}

impl RefreshOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RefreshOutcome::Committed { .. })
    }
}

/// Drives a [`CatalogLoader`] on a fixed period and commits into a store.
pub struct RefreshScheduler<S> {
    loader: CatalogLoader<S>,
    store: Arc<CatalogStore>,
    period: Duration,
}

impl<S: CatalogSource + 'static> RefreshScheduler<S> {
    pub fn new(loader: CatalogLoader<S>, store: Arc<CatalogStore>, period: Duration) -> Self {
        Self {
            loader,
            store,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Load once and commit if the result is usable.
    pub async fn refresh_once(&self) -> RefreshOutcome {
        let source = self.loader.source().describe();
        match self.loader.load().await {
            Ok(catalog) if catalog.is_empty() => {
                warn!(
                    source = %source,
                    kept_revision = self.store.revision(),
                    "catalog source returned no valid entries, keeping current catalog"
                );
                RefreshOutcome::Empty
            }
            Ok(catalog) => {
                let entries = catalog.len();
                let revision = self.store.commit(catalog);
                info!(source = %source, entries, revision, "catalog refreshed");
                RefreshOutcome::Committed { entries, revision }
            }
            Err(e) => {
                warn!(
                    source = %source,
                    error = %e,
                    kept_revision = self.store.revision(),
                    "catalog refresh failed, keeping current catalog"
                );
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Spawn the periodic loop.
    ///
    /// The first refresh happens one full period from now; callers run
    /// [`refresh_once`](Self::refresh_once) themselves at startup.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            info!(period_s = self.period.as_secs(), "catalog refresh loop started");
            loop {
                interval.tick().await;
                self.refresh_once().await;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
