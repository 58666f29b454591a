//! HTTP client for the CDN cache invalidation service.
//!
//! When no distribution id is configured the client reports itself
//! disabled: submissions return `None` and queries return empty results, so
//! cleanup degrades to "zero paths cleaned" instead of failing.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::config::CdnConfig;
use crate::{AppError, Result};

use super::{BoxFuture, CacheInvalidator, InvalidationStatus};

/// [`CacheInvalidator`] backed by the invalidation service's JSON API.
pub struct HttpCacheInvalidator {
    client: reqwest::Client,
    endpoint: Option<String>,
    distribution_id: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct CreateInvalidationResponse {
    id: String,
}

#[derive(Deserialize)]
struct ListInvalidationsResponse {
    invalidations: Vec<InvalidationStatus>,
}

impl HttpCacheInvalidator {
    /// Build an invalidation client; disabled when the config carries no
    /// endpoint or distribution id.
    #[must_use]
    pub fn new(config: &CdnConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_owned()),
            distribution_id: config.distribution_id.clone(),
            timeout: Duration::from_secs(config.cdn_timeout_seconds),
        }
    }

    fn base(&self) -> Option<(String, &str)> {
        let endpoint = self.endpoint.as_ref()?;
        let distribution = self.distribution_id.as_deref()?;
        Some((
            format!("{endpoint}/v1/distributions/{distribution}"),
            distribution,
        ))
    }

    async fn invalidate_inner(&self, paths: &[String]) -> Result<Option<String>> {
        let Some((base, distribution)) = self.base() else {
            info!("cdn invalidation not configured; skipping");
            return Ok(None);
        };
        if paths.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(format!("{base}/invalidations"))
            .timeout(self.timeout)
            .json(&json!({
                "paths": paths,
                "caller_reference": format!("workspace-cleanup-{}", Uuid::new_v4()),
            }))
            .send()
            .await
            .map_err(|err| AppError::Cache(format!("invalidation request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Cache(format!(
                "invalidation rejected: {status}: {body}"
            )));
        }

        let parsed: CreateInvalidationResponse = response
            .json()
            .await
            .map_err(|err| AppError::Cache(format!("invalid invalidation response: {err}")))?;
        info!(
            invalidation_id = parsed.id,
            distribution,
            paths = paths.len(),
            "cdn invalidation created"
        );
        Ok(Some(parsed.id))
    }

    async fn status_inner(&self, id: &str) -> Result<Option<InvalidationStatus>> {
        let Some((base, _)) = self.base() else {
            return Ok(None);
        };

        let response = self
            .client
            .get(format!("{base}/invalidations/{id}"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| AppError::Cache(format!("invalidation status query failed: {err}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Cache(format!(
                "invalidation status query rejected: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|err| AppError::Cache(format!("invalid status response: {err}")))
    }

    async fn list_recent_inner(&self, max_items: u32) -> Result<Vec<InvalidationStatus>> {
        let Some((base, _)) = self.base() else {
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(format!("{base}/invalidations"))
            .timeout(self.timeout)
            .query(&[("max_items", max_items.to_string())])
            .send()
            .await
            .map_err(|err| AppError::Cache(format!("invalidation list query failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Cache(format!(
                "invalidation list query rejected: {}",
                response.status()
            )));
        }
        let parsed: ListInvalidationsResponse = response
            .json()
            .await
            .map_err(|err| AppError::Cache(format!("invalid list response: {err}")))?;
        Ok(parsed.invalidations)
    }
}

impl CacheInvalidator for HttpCacheInvalidator {
    fn invalidate(&self, paths: &[String]) -> BoxFuture<'_, Result<Option<String>>> {
        let paths = paths.to_vec();
        Box::pin(async move { self.invalidate_inner(&paths).await })
    }

    fn invalidation_status(&self, id: &str) -> BoxFuture<'_, Result<Option<InvalidationStatus>>> {
        let id = id.to_owned();
        Box::pin(async move { self.status_inner(&id).await })
    }

    fn list_recent(&self, max_items: u32) -> BoxFuture<'_, Result<Vec<InvalidationStatus>>> {
        Box::pin(self.list_recent_inner(max_items))
    }

    fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.distribution_id.is_some()
    }
}
