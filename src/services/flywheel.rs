//! Flywheel REST API client
//!
//! Talks to `https://<site>/api` with the `scitran-user` API key scheme.
//! Reads go through the rate limiter with retries; deletes are sent once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::platform::{ContainerKind, Platform, Project};
use super::rate_limiter::{
    RateLimitConfig, RateLimitedClient, RetryConfig, is_transient_status, retry_async_if,
};
use crate::config::Config;
use crate::views::{ViewLevel, ViewResponse, ViewSpec, ViewTable};

/// Flywheel API client with rate limiting and retry logic
pub struct FlywheelClient {
    client: Arc<RateLimitedClient>,
    base_url: Url,
    retry_config: RetryConfig,
}

impl FlywheelClient {
    /// Create a client for the API root `base_url` authenticated with `api_key`
    pub fn new(base_url: Url, api_key: &str, rate_limit: RateLimitConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("scitran-user {}", api_key))
            .context("API key contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        Ok(Self {
            client: Arc::new(RateLimitedClient::new("flywheel", rate_limit, headers)?),
            base_url,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let requests_per_second = config.requests_per_second.max(1);
        Self::new(
            config.api_url.clone(),
            &config.api_key,
            RateLimitConfig {
                requests_per_second,
                burst_size: requests_per_second.saturating_mul(2),
            },
        )
    }

    /// Build `<base>/<segments...>` without dropping the base path
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.base_url, segments)
    }

    async fn delete_by_id(&self, kind: ContainerKind, id: &str) -> Result<()> {
        let url = self.endpoint(&[kind.collection(), id])?;
        info!(kind = %kind, id = %id, "Deleting container");

        let response = self.client.delete(url.as_str()).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Delete of {} {} failed with status {}: {}",
                kind,
                id,
                status,
                body.trim()
            );
        }
        Ok(())
    }
}

/// A request the platform refused outright; sending it again will not help
#[derive(Debug, Error)]
#[error("{operation} failed with status: {status}")]
pub struct RejectedRequest {
    pub operation: &'static str,
    pub status: StatusCode,
}

/// Map a response status to the outcome of a read.
///
/// Transient statuses come back as plain errors so the caller retries them;
/// anything else that is not a success is a [`RejectedRequest`].
pub fn check_status(operation: &'static str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(operation = %operation, "Flywheel rate limit hit, will retry");
    }
    if is_transient_status(status.as_u16()) {
        anyhow::bail!("{} failed transiently with status: {}", operation, status);
    }
    let rejected = RejectedRequest { operation, status };
    if status == StatusCode::UNAUTHORIZED {
        return Err(anyhow::Error::new(rejected).context("Flywheel API key was rejected"));
    }
    Err(rejected.into())
}

fn is_retryable(error: &anyhow::Error) -> bool {
    error.downcast_ref::<RejectedRequest>().is_none()
}

/// Append path segments to an API root, keeping its own path (e.g. `/api`)
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("API URL cannot be a base: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl Platform for FlywheelClient {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = self.endpoint(&["projects"])?;
        let client = self.client.clone();

        let projects = retry_async_if(
            || {
                let url = url.clone();
                let client = client.clone();
                async move {
                    let response = client.get(url.as_str()).await?;
                    check_status("Listing projects", response.status())?;

                    let projects: Vec<Project> = response
                        .json()
                        .await
                        .context("Failed to parse project listing")?;
                    Ok(projects)
                }
            },
            &self.retry_config,
            "flywheel_list_projects",
            is_retryable,
        )
        .await?;

        debug!(count = projects.len(), "Flywheel returned projects");
        Ok(projects)
    }

    async fn fetch_view(&self, level: ViewLevel, project_id: &str) -> Result<ViewTable> {
        let url = self.endpoint(&["views", "data"])?;
        let spec = ViewSpec::for_level(level);
        let client = self.client.clone();
        let project_id = project_id.to_string();

        let response: ViewResponse = retry_async_if(
            || {
                let url = url.clone();
                let client = client.clone();
                let spec = spec.clone();
                let query = [("containerId", project_id.clone()), ("format", "json".to_string())];
                async move {
                    let response = client.post_json(url.as_str(), &query, &spec).await?;
                    check_status("Data view request", response.status())?;

                    response
                        .json::<ViewResponse>()
                        .await
                        .context("Failed to parse data view response")
                }
            },
            &self.retry_config,
            "flywheel_fetch_view",
            is_retryable,
        )
        .await?;

        let table = ViewTable::from_response(response)
            .with_context(|| format!("Malformed {} view", level))?;
        debug!(level = %level, rows = table.len(), "Fetched data view");
        Ok(table)
    }

    async fn delete_subject(&self, id: &str) -> Result<()> {
        self.delete_by_id(ContainerKind::Subject, id).await
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.delete_by_id(ContainerKind::Session, id).await
    }

    async fn delete_acquisition(&self, id: &str) -> Result<()> {
        self.delete_by_id(ContainerKind::Acquisition, id).await
    }
}
