//! Fetching and flattening the remote song catalog.
//!
//! The loader never touches the [`CatalogStore`](crate::catalog::CatalogStore);
//! it only turns whatever the [`CatalogSource`] returns into a [`Catalog`] or
//! a [`LoadFailure`]. Deciding whether to commit is the scheduler's job.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::catalog::Catalog;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a catalog could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadFailure {
    /// Transport / connection error.
    #[error("network error fetching catalog: {0}")]
    Network(String),
    /// The source answered with a non-success status.
    #[error("catalog source returned HTTP {0}")]
    BadStatus(u16),
    /// The body was not JSON, or not a JSON object.
    #[error("malformed catalog payload: {0}")]
    MalformedJson(String),
    /// The source location was never configured.
    #[error("catalog source not configured: {0}")]
    MissingConfig(&'static str),
}

// ---------------------------------------------------------------------------
// Source abstraction
// ---------------------------------------------------------------------------

/// Somewhere raw catalog JSON can be fetched from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the raw payload.
    async fn fetch(&self) -> Result<Value, LoadFailure>;

    /// Short human-readable location for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Fetch-and-flatten over a [`CatalogSource`].
#[derive(Debug)]
pub struct CatalogLoader<S> {
    source: S,
}

impl<S: CatalogSource> CatalogLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the payload and flatten it into a catalog.
    ///
    /// An empty catalog is a successful load; only an unreachable source or
    /// an unusable payload is a [`LoadFailure`].
    pub async fn load(&self) -> Result<Catalog, LoadFailure> {
        let raw = match self.source.fetch().await? {
            Value::Object(raw) => raw,
            other => {
                return Err(LoadFailure::MalformedJson(format!(
                    "expected a JSON object at the top level, got {}",
                    json_kind(&other)
                )))
            }
        };
        let catalog = Catalog::from_raw(&raw);
        debug!(
            source = %self.source.describe(),
            titles = raw.len(),
            entries = catalog.len(),
            "flattened catalog payload"
        );
        Ok(catalog)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

#[cfg(feature = "io")]
pub use self::http_source::HttpCatalogSource;

#[cfg(feature = "io")]
mod http_source {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{CatalogSource, LoadFailure};

    const USER_AGENT: &str = concat!("song-selector/", env!("CARGO_PKG_VERSION"));
    const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

    /// Fetches the catalog with an HTTP GET.
    #[derive(Debug, Clone)]
    pub struct HttpCatalogSource {
        client: reqwest::Client,
        url: String,
    }

    impl HttpCatalogSource {
        pub fn new(url: impl Into<String>) -> Result<Self, LoadFailure> {
            let url = url.into();
            if url.trim().is_empty() {
                return Err(LoadFailure::MissingConfig("catalog URL is empty"));
            }
            let client = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(FETCH_TIMEOUT)
                .build()
                .map_err(|e| LoadFailure::Network(e.to_string()))?;
            Ok(Self { client, url })
        }
    }

    #[async_trait]
    impl CatalogSource for HttpCatalogSource {
        async fn fetch(&self) -> Result<Value, LoadFailure> {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| LoadFailure::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(LoadFailure::BadStatus(status.as_u16()));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| LoadFailure::Network(e.to_string()))?;

            serde_json::from_slice(&body).map_err(|e| LoadFailure::MalformedJson(e.to_string()))
        }

        fn describe(&self) -> String {
            self.url.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
