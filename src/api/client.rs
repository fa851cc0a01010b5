//! HTTP client for the VMManager 6 API
//!
//! One pooled connection client constructed at startup; the session
//! token lives inside the client and is injected into every request as
//! the `x-xsrf-token` header. A rejected token (HTTP 401) triggers one
//! transparent re-authentication before the request is replayed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::types::{
    AuthRequest, AuthResponse, ClusterPayload, ListResponse, MigrateRequest, MigrateResponse,
    NodePayload, TaskPayload, VmPayload,
};
use super::{JobOutcome, ManagerApi};
use crate::inventory::{ClusterInfo, NodeInfo, VmInfo};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct VmManagerClient {
    host: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
    shutdown: watch::Receiver<bool>,
}

impl VmManagerClient {
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        verify_ssl: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client,
            token: RwLock::new(None),
            shutdown,
        })
    }

    /// Build and send a request with the current session token attached.
    async fn dispatch<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.host, path);
        let mut request = self.client.request(method, &url);

        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header("x-xsrf-token", token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Send a request, re-authenticating once if the session token was
    /// rejected.
    async fn execute<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let response = self.dispatch(method.clone(), path, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Session token rejected by {}, re-authenticating", path);
            self.authenticate().await?;
            return self.dispatch(method, path, body).await;
        }
        Ok(response)
    }

    /// Read the response body and decode it, distinguishing remote
    /// rejections from malformed payloads.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute::<()>(Method::GET, path, None).await?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.execute(Method::POST, path, Some(body)).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ManagerApi for VmManagerClient {
    async fn authenticate(&self) -> Result<()> {
        let request = AuthRequest {
            email: &self.username,
            password: &self.password,
        };

        let url = format!("{}/auth/v4/public/token", self.host);
        let response = self.client.post(&url).json(&request).send().await?;

        let auth: AuthResponse = match Self::decode(response).await {
            Ok(auth) => auth,
            Err(Error::Http { status, body }) if status == 401 || status == 403 => {
                error!("Authentication rejected ({}): {}", status, body);
                return Err(Error::Auth);
            }
            Err(e) => return Err(e),
        };

        match auth.token {
            Some(token) => {
                *self.token.write().await = Some(token);
                info!("Successfully authenticated with VMManager");
                Ok(())
            }
            None => {
                error!("Authentication response carried no token");
                Err(Error::Auth)
            }
        }
    }

    async fn check_reachable(&self) -> bool {
        match self
            .get_json::<ListResponse<ClusterPayload>>("/vm/v3/cluster")
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to check API accessibility: {}", e);
                false
            }
        }
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        let payloads: ListResponse<ClusterPayload> = self.get_json("/vm/v3/cluster").await?;

        let mut clusters = Vec::new();
        for payload in payloads.into_vec() {
            let id = payload.id.to_string();
            match self.list_nodes(&id).await {
                Ok(nodes) => clusters.push(ClusterInfo {
                    id,
                    name: payload.name,
                    nodes,
                }),
                Err(e) => {
                    error!("Failed to get nodes for cluster {}: {}", payload.name, e);
                }
            }
        }

        Ok(clusters)
    }

    async fn list_nodes(&self, cluster_id: &str) -> Result<Vec<NodeInfo>> {
        let payloads: ListResponse<NodePayload> = self.get_json("/vm/v3/node").await?;

        Ok(payloads
            .into_vec()
            .into_iter()
            .filter(|node| node.cluster.id_string() == cluster_id)
            .map(NodePayload::into_node)
            .collect())
    }

    async fn list_vms(&self, cluster_id: &str) -> Result<Vec<VmInfo>> {
        let payloads: ListResponse<VmPayload> = self.get_json("/vm/v3/host").await?;
        let payloads = payloads.into_vec();

        debug!(
            "Retrieved {} VMs from API for cluster {}",
            payloads.len(),
            cluster_id
        );

        let vms: Vec<VmInfo> = payloads
            .into_iter()
            .filter(|vm| vm.cluster.id_string() == cluster_id)
            .map(VmPayload::into_vm)
            .collect();

        debug!("Filtered {} VMs for cluster {}", vms.len(), cluster_id);
        Ok(vms)
    }

    async fn submit_migration(
        &self,
        vm_id: &str,
        target_node_id: &str,
    ) -> Result<Option<String>> {
        // The migrate endpoint wants the node id as a number.
        let node = target_node_id.parse::<i64>().map_err(|_| {
            Error::Config(format!("Target node id '{}' is not numeric", target_node_id))
        })?;

        debug!("Migrating VM {} to node {}", vm_id, target_node_id);

        let path = format!("/vm/v3/host/{}/migrate", vm_id);
        let response: MigrateResponse = self.post_json(&path, &MigrateRequest { node }).await?;

        Ok(response.id.map(|id| id.to_string()))
    }

    async fn poll_job(&self, job_id: &str, timeout: Duration) -> Result<JobOutcome> {
        let started = Instant::now();
        let mut last_progress_log = Duration::ZERO;
        let mut shutdown = self.shutdown.clone();

        info!(
            "Waiting for migration job {} to complete (timeout: {} minutes)",
            job_id,
            timeout.as_secs() / 60
        );

        loop {
            if *shutdown.borrow() {
                warn!("Shutdown requested, abandoning watch on job {}", job_id);
                return Ok(JobOutcome::Interrupted);
            }
            if started.elapsed() >= timeout {
                warn!("Job {} timed out after {} seconds", job_id, timeout.as_secs());
                return Ok(JobOutcome::TimedOut);
            }

            let task: TaskPayload = self.get_json(&format!("/vm/v3/task/{}", job_id)).await?;
            let status = task.status.to_lowercase();

            match status.as_str() {
                "success" => {
                    info!(
                        "Migration job {} completed successfully in {:.1} seconds",
                        job_id,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(JobOutcome::Success);
                }
                "error" => {
                    let message = task
                        .error_message
                        .unwrap_or_else(|| "Unknown error".to_string());
                    error!("Job {} failed: {}", job_id, message);
                    return Ok(JobOutcome::Failed(message));
                }
                _ => {}
            }

            let elapsed = started.elapsed();
            if elapsed - last_progress_log >= PROGRESS_LOG_INTERVAL {
                let mut extra = Vec::new();
                if let Some(percent) = task.progress_percent {
                    extra.push(format!("percent: {}%", percent));
                }
                if let Some(remaining) = task.remaining_time {
                    extra.push(format!("remaining: {}s", remaining));
                }
                if let Some(step) = &task.current_step {
                    extra.push(format!("step: {}", step));
                }
                let extra = if extra.is_empty() {
                    String::new()
                } else {
                    format!(", {}", extra.join(", "))
                };

                let progress = match &task.progress {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "unknown".to_string(),
                };
                let status_info = if status.is_empty() {
                    "running"
                } else {
                    status.as_str()
                };

                info!(
                    "Migration job {} in progress: {:.0}s elapsed, status: '{}', progress: '{}'{}",
                    job_id,
                    elapsed.as_secs_f64(),
                    status_info,
                    progress,
                    extra
                );
                last_progress_log = elapsed;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}
