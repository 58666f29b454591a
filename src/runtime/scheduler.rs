//! HTTP client for the remote task scheduler.
//!
//! The scheduler runs containerized multiplayer session workloads. Run
//! requests carry the session/workspace/company identifiers as task tags so
//! tasks that outlive their session row can still be discovered by
//! workspace tag during cleanup.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::MultiplayerConfig;
use crate::{AppError, Result};

use super::{BoxFuture, ClusterStats, RunTaskRequest, StopTaskOutcome, TaskScheduler};

/// [`TaskScheduler`] backed by the scheduler's JSON API.
pub struct HttpTaskScheduler {
    client: reqwest::Client,
    endpoint: String,
    cluster: String,
    task_definition: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct RunTaskResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct ListTasksResponse {
    tasks: Vec<String>,
}

impl HttpTaskScheduler {
    /// Build a scheduler client from the multiplayer configuration.
    #[must_use]
    pub fn new(config: &MultiplayerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.scheduler_endpoint.trim_end_matches('/').to_owned(),
            cluster: config.cluster.clone(),
            task_definition: config.task_definition.clone(),
            timeout: Duration::from_secs(config.scheduler_timeout_seconds),
        }
    }

    async fn run_task_inner(&self, request: &RunTaskRequest) -> Result<String> {
        let url = format!("{}/v1/tasks", self.endpoint);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "cluster": self.cluster,
                "task_definition": self.task_definition,
                "tags": {
                    "session_id": request.session_id,
                    "workspace_id": request.workspace_id,
                    "company_id": request.company_id.to_string(),
                    "service": "playhost-multiplayer",
                },
                "environment": {
                    "SESSION_ID": request.session_id,
                    "WORKSPACE_ID": request.workspace_id,
                    "MAX_PLAYERS": request.max_players.to_string(),
                },
            }))
            .send()
            .await
            .map_err(|err| AppError::Scheduler(format!("run task request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Scheduler(format!(
                "scheduler rejected run request: {status}: {body}"
            )));
        }

        let parsed: RunTaskResponse = response
            .json()
            .await
            .map_err(|err| AppError::Scheduler(format!("invalid run response: {err}")))?;
        info!(
            task_id = parsed.task_id,
            session_id = request.session_id,
            workspace_id = request.workspace_id,
            "remote session task started"
        );
        Ok(parsed.task_id)
    }

    async fn stop_task_inner(&self, handle: &str, reason: &str) -> Result<StopTaskOutcome> {
        let url = format!("{}/v1/tasks/{handle}/stop", self.endpoint);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({ "reason": reason }))
            .send()
            .await
            .map_err(|err| AppError::Scheduler(format!("stop task request failed: {err}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(handle, "remote task already stopped or not found");
            return Ok(StopTaskOutcome::AlreadyGone);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Scheduler(format!(
                "scheduler rejected stop request: {status}: {body}"
            )));
        }
        info!(handle, reason, "remote task stopped");
        Ok(StopTaskOutcome::Stopped)
    }

    async fn list_tasks_inner(&self, workspace_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/tasks", self.endpoint);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .query(&[
                ("cluster", self.cluster.as_str()),
                ("workspace_id", workspace_id),
                ("status", "running"),
            ])
            .send()
            .await
            .map_err(|err| AppError::Scheduler(format!("list tasks request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Scheduler(format!(
                "scheduler rejected list request: {}",
                response.status()
            )));
        }
        let parsed: ListTasksResponse = response
            .json()
            .await
            .map_err(|err| AppError::Scheduler(format!("invalid list response: {err}")))?;
        Ok(parsed.tasks)
    }

    async fn cluster_stats_inner(&self) -> Result<ClusterStats> {
        let url = format!("{}/v1/clusters/{}/stats", self.endpoint, self.cluster);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| AppError::Scheduler(format!("cluster stats request failed: {err}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ClusterStats::default());
        }
        if !response.status().is_success() {
            return Err(AppError::Scheduler(format!(
                "scheduler rejected stats request: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| AppError::Scheduler(format!("invalid stats response: {err}")))
    }
}

impl TaskScheduler for HttpTaskScheduler {
    fn run_task(&self, request: &RunTaskRequest) -> BoxFuture<'_, Result<String>> {
        let request = request.clone();
        Box::pin(async move { self.run_task_inner(&request).await })
    }

    fn stop_task(&self, handle: &str, reason: &str) -> BoxFuture<'_, Result<StopTaskOutcome>> {
        let handle = handle.to_owned();
        let reason = reason.to_owned();
        Box::pin(async move { self.stop_task_inner(&handle, &reason).await })
    }

    fn list_tasks_for_workspace(&self, workspace_id: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let workspace_id = workspace_id.to_owned();
        Box::pin(async move { self.list_tasks_inner(&workspace_id).await })
    }

    fn cluster_stats(&self) -> BoxFuture<'_, Result<ClusterStats>> {
        Box::pin(self.cluster_stats_inner())
    }
}
