//! HTTP client for the preview server's health and command endpoints.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::config::PreviewConfig;
use crate::{AppError, Result};

use super::{BoxFuture, PreviewEndpoint};

/// [`PreviewEndpoint`] backed by `reqwest` with per-call timeouts.
pub struct HttpPreviewClient {
    client: reqwest::Client,
    health_timeout: Duration,
    command_timeout: Duration,
}

impl HttpPreviewClient {
    /// Build a client with the configured health and command timeouts.
    #[must_use]
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            health_timeout: Duration::from_secs(config.health_timeout_seconds),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
        }
    }

    async fn check_health_inner(&self, port: u16) -> Result<()> {
        let url = format!("http://localhost:{port}/health");
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|err| AppError::UpstreamError(format!("health check failed: {err}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::UpstreamError(format!(
                "health endpoint returned {}",
                response.status()
            )))
        }
    }

    async fn send_command_inner(
        &self,
        port: u16,
        workspace_id: &str,
        command: &str,
    ) -> Result<serde_json::Value> {
        let url = format!("http://localhost:{port}/v1/command");
        debug!(workspace_id, port, "dispatching preview server command");

        let response = self
            .client
            .post(&url)
            .timeout(self.command_timeout)
            .json(&json!({
                "command": command,
                "workspace_id": workspace_id,
            }))
            .send()
            .await
            .map_err(|err| AppError::UpstreamError(format!("command dispatch failed: {err}")))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|err| AppError::UpstreamError(format!("invalid command response: {err}")))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AppError::UpstreamError(format!(
                "preview server returned {status}: {body}"
            )))
        }
    }
}

impl PreviewEndpoint for HttpPreviewClient {
    fn check_health(&self, port: u16) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.check_health_inner(port))
    }

    fn send_command(
        &self,
        port: u16,
        workspace_id: &str,
        command: &str,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let workspace_id = workspace_id.to_owned();
        let command = command.to_owned();
        Box::pin(async move { self.send_command_inner(port, &workspace_id, &command).await })
    }
}
