//! Application configuration management

use std::env;

use anyhow::{Context, Result, bail};
use url::Url;

/// Default recency window; anything newer is left alone.
pub const DEFAULT_MIN_AGE_HOURS: i64 = 24;
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Sweep configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw API key, sent verbatim in the Authorization header
    pub api_key: String,

    /// API root, e.g. `https://example.flywheel.io/api`
    pub api_url: Url,

    /// Containers younger than this many hours are never deleted
    pub min_age_hours: i64,

    /// Report what would be deleted without deleting it
    pub dry_run: bool,

    /// Client-side request budget against the platform
    pub requests_per_second: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FLYWHEEL_API_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .context("FLYWHEEL_API_TOKEN is required")?;

        let api_url = match lookup("FLYWHEEL_API_URL") {
            Some(url) => Url::parse(&url).context("Invalid FLYWHEEL_API_URL")?,
            None => api_url_from_key(&api_key)?,
        };

        let min_age_hours = match lookup("SWEEP_MIN_AGE_HOURS") {
            Some(v) => v.parse().context("Invalid SWEEP_MIN_AGE_HOURS")?,
            None => DEFAULT_MIN_AGE_HOURS,
        };
        if min_age_hours < 0 {
            bail!("SWEEP_MIN_AGE_HOURS must not be negative");
        }
        let requests_per_second = match lookup("FLYWHEEL_REQUESTS_PER_SECOND") {
            Some(v) => v.parse().context("Invalid FLYWHEEL_REQUESTS_PER_SECOND")?,
            None => DEFAULT_REQUESTS_PER_SECOND,
        };

        Ok(Self {
            api_key,
            api_url,
            min_age_hours,
            dry_run: lookup("SWEEP_DRY_RUN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            requests_per_second,
        })
    }
}

/// Derive the API root from a `<host>:<secret>` or `<host>:<port>:<secret>` key.
pub fn api_url_from_key(api_key: &str) -> Result<Url> {
    let parts: Vec<&str> = api_key.split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host, _secret] => (*host, None),
        [host, port, _secret] => {
            let port: u16 = port.parse().context("Invalid port in API key")?;
            (*host, Some(port))
        }
        _ => bail!("API key must look like <host>:<secret>"),
    };
    if host.is_empty() {
        bail!("API key is missing its host part");
    }

    let url = match port {
        Some(port) => format!("https://{}:{}/api", host, port),
        None => format!("https://{}/api", host),
    };
    Url::parse(&url).with_context(|| format!("Invalid host in API key: {}", host))
}
