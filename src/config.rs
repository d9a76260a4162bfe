//! Process configuration, read once at startup from the environment.
//!
//! A `.env` file in the working directory is loaded first (if present), so
//! local runs and hosted deployments use the same variable names.

use std::time::Duration;

use tracing::warn;

pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
/// Older deployments used this name for the token.
pub const LEGACY_TOKEN_VAR: &str = "DISCORD_BOT_TOKEN";
pub const CATALOG_URL_VAR: &str = "SONGS_JSON_URL";
pub const REFRESH_INTERVAL_VAR: &str = "REFRESH_INTERVAL_SECS";
pub const KEEPALIVE_PORT_VAR: &str = "KEEPALIVE_PORT";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_KEEPALIVE_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub token: String,
    pub catalog_url: String,
    pub refresh_interval: Duration,
    /// `None` disables the keep-alive endpoint.
    pub keepalive_port: Option<u16>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("catalog_url", &self.catalog_url)
            .field("refresh_interval", &self.refresh_interval)
            .field("keepalive_port", &self.keepalive_port)
            .finish()
    }
}

impl Config {
    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token = get(TOKEN_VAR)
            .or_else(|| get(LEGACY_TOKEN_VAR))
            .ok_or(ConfigError::Missing(TOKEN_VAR))?;

        let catalog_url = get(CATALOG_URL_VAR).ok_or(ConfigError::Missing(CATALOG_URL_VAR))?;
        if !(catalog_url.starts_with("http://") || catalog_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: CATALOG_URL_VAR,
                value: catalog_url,
                reason: "expected an http(s) URL".to_string(),
            });
        }

        let refresh_interval = match get(REFRESH_INTERVAL_VAR) {
            None => DEFAULT_REFRESH_INTERVAL,
            Some(raw) => {
                let secs = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    var: REFRESH_INTERVAL_VAR,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                let requested = Duration::from_secs(secs);
                if requested < MIN_REFRESH_INTERVAL {
                    warn!(
                        requested_s = secs,
                        minimum_s = MIN_REFRESH_INTERVAL.as_secs(),
                        "refresh interval too short, using minimum"
                    );
                    MIN_REFRESH_INTERVAL
                } else {
                    requested
                }
            }
        };

        let keepalive_port = match get(KEEPALIVE_PORT_VAR) {
            None => Some(DEFAULT_KEEPALIVE_PORT),
            Some(raw) if raw.eq_ignore_ascii_case("off") || raw == "0" => None,
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: KEEPALIVE_PORT_VAR,
                value: raw.clone(),
                reason: e.to_string(),
            })?),
        };

        Ok(Self {
            token,
            catalog_url,
            refresh_interval,
            keepalive_port,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    const URL: &str = "https://example.com/songs.json";

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = config(&[(TOKEN_VAR, "tok"), (CATALOG_URL_VAR, URL)]).unwrap();
        assert_eq!(cfg.token, "tok");
        assert_eq!(cfg.catalog_url, URL);
        assert_eq!(cfg.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(cfg.keepalive_port, Some(DEFAULT_KEEPALIVE_PORT));
    }

    #[test]
    fn missing_token_is_fatal() {
        assert_eq!(
            config(&[(CATALOG_URL_VAR, URL)]),
            Err(ConfigError::Missing(TOKEN_VAR))
        );
        assert_eq!(
            config(&[(TOKEN_VAR, "   "), (CATALOG_URL_VAR, URL)]),
            Err(ConfigError::Missing(TOKEN_VAR))
        );
    }

    #[test]
    fn legacy_token_name_is_accepted() {
        let cfg = config(&[(LEGACY_TOKEN_VAR, "old"), (CATALOG_URL_VAR, URL)]).unwrap();
        assert_eq!(cfg.token, "old");
    }

    #[test]
    fn missing_or_bad_url_is_fatal() {
        assert_eq!(
            config(&[(TOKEN_VAR, "tok")]),
            Err(ConfigError::Missing(CATALOG_URL_VAR))
        );
        assert!(matches!(
            config(&[(TOKEN_VAR, "tok"), (CATALOG_URL_VAR, "songs.json")]),
            Err(ConfigError::Invalid { var: CATALOG_URL_VAR, .. })
        ));
    }

    #[test]
    fn refresh_interval_is_parsed_and_clamped() {
        let base = [(TOKEN_VAR, "tok"), (CATALOG_URL_VAR, URL)];

        let cfg = config(&[base[0], base[1], (REFRESH_INTERVAL_VAR, "120")]).unwrap();
        assert_eq!(cfg.refresh_interval, Duration::from_secs(120));

        let cfg = config(&[base[0], base[1], (REFRESH_INTERVAL_VAR, "5")]).unwrap();
        assert_eq!(cfg.refresh_interval, MIN_REFRESH_INTERVAL);

        assert!(matches!(
            config(&[base[0], base[1], (REFRESH_INTERVAL_VAR, "ten")]),
            Err(ConfigError::Invalid { var: REFRESH_INTERVAL_VAR, .. })
        ));
    }

    #[test]
    fn keepalive_port_can_be_changed_or_disabled() {
        let base = [(TOKEN_VAR, "tok"), (CATALOG_URL_VAR, URL)];

        let cfg = config(&[base[0], base[1], (KEEPALIVE_PORT_VAR, "3000")]).unwrap();
        assert_eq!(cfg.keepalive_port, Some(3000));

        let cfg = config(&[base[0], base[1], (KEEPALIVE_PORT_VAR, "off")]).unwrap();
        assert_eq!(cfg.keepalive_port, None);

        let cfg = config(&[base[0], base[1], (KEEPALIVE_PORT_VAR, "0")]).unwrap();
        assert_eq!(cfg.keepalive_port, None);

        assert!(config(&[base[0], base[1], (KEEPALIVE_PORT_VAR, "99999")]).is_err());
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = config(&[(TOKEN_VAR, "super-secret"), (CATALOG_URL_VAR, URL)]).unwrap();
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("super-secret"));
        assert!(shown.contains("<redacted>"));
    }
}
