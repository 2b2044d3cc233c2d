//! The job watcher: submit a workflow, wait for it, resolve its outputs.
//!
//! [`JobWatcher`] holds only configuration and a pooled HTTP client, so a
//! single instance can be shared (`Arc<JobWatcher>`) by concurrent callers.
//! Every call to [`JobWatcher::execute`] runs its own session.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::api::{ComfyUIApi, UploadResponse};
use crate::client::{ws_url_from_api_url, ComfyUIClient, ComfyUIConnection};
use crate::history::{HistoryEntry, OutputReference};
use crate::watch::polling::PollingWatcher;
use crate::watch::streaming::StreamingWatcher;
use crate::watch::{CompletionWatcher, JobTicket, WatchError, WatchSession, WatchStrategy};

/// Default wait before a job is abandoned.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default history polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Connection and timing settings for a [`JobWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub strategy: WatchStrategy,
}

impl WatcherConfig {
    /// Defaults for an executor at `api_url`, with the WebSocket URL
    /// derived from it.
    pub fn from_api_url(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            ws_url: ws_url_from_api_url(&api_url),
            api_url,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            strategy: WatchStrategy::Auto,
        }
    }
}

/// Result of a successfully watched job.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub prompt_id: String,
    /// Strategy that observed completion.
    pub strategy: WatchStrategy,
    pub history: HistoryEntry,
    pub elapsed: Duration,
}

impl CompletedJob {
    /// Output references in deterministic order.
    pub fn outputs(&self) -> Vec<OutputReference> {
        self.history.output_references()
    }

    /// Executor-side failure message, if the job ended in an error.
    pub fn execution_error(&self) -> Option<String> {
        self.history.execution_error()
    }
}

/// Submits jobs to one ComfyUI executor and watches them to completion.
#[derive(Debug, Clone)]
pub struct JobWatcher {
    api: ComfyUIApi,
    ws: ComfyUIClient,
    config: WatcherConfig,
}

impl JobWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Build a watcher sharing an existing HTTP connection pool.
    pub fn with_client(client: reqwest::Client, config: WatcherConfig) -> Self {
        Self {
            api: ComfyUIApi::with_client(client, config.api_url.clone()),
            ws: ComfyUIClient::new(config.ws_url.clone()),
            config,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Submit a job document and return the prompt id the executor will
    /// report it under.
    ///
    /// The executor's id wins when it returns one; otherwise the ticket's
    /// minted id is used. Never retried.
    pub async fn submit(&self, workflow: &Value, ticket: &JobTicket) -> Result<String, WatchError> {
        let response = self
            .api
            .submit_workflow(workflow, &ticket.client_id, &ticket.prompt_id)
            .await
            .map_err(WatchError::from_submit)?;

        if response.node_errors.as_object().is_some_and(|errs| !errs.is_empty()) {
            tracing::warn!(
                node_errors = %response.node_errors,
                "ComfyUI reported node errors on submit",
            );
        }

        let prompt_id = response
            .prompt_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ticket.prompt_id.clone());

        tracing::info!(
            prompt_id = %prompt_id,
            queue_number = ?response.number,
            "Workflow submitted",
        );
        Ok(prompt_id)
    }

    /// Open the progress channel for a ticket. Call before [`submit`](Self::submit).
    pub async fn open_channel(&self, ticket: &JobTicket) -> Result<ComfyUIConnection, WatchError> {
        Ok(self.ws.connect(&ticket.client_id).await?)
    }

    async fn open_channel_by(
        &self,
        ticket: &JobTicket,
        deadline: Instant,
    ) -> Result<ComfyUIConnection, WatchError> {
        tokio::time::timeout_at(deadline, self.open_channel(ticket))
            .await
            .unwrap_or_else(|_| {
                Err(WatchError::Connection(
                    "Timed out opening progress channel".to_string(),
                ))
            })
    }

    /// Wait for completion over an already opened progress channel.
    pub async fn watch_streaming(
        &self,
        connection: ComfyUIConnection,
        session: &mut WatchSession,
    ) -> Result<HistoryEntry, WatchError> {
        let mut watcher =
            StreamingWatcher::new(self.api.clone(), connection, self.config.poll_interval);
        watcher.wait_for_completion(session).await
    }

    /// Wait for completion by polling history every `interval`.
    pub async fn watch_polling(
        &self,
        session: &mut WatchSession,
        interval: Duration,
    ) -> Result<HistoryEntry, WatchError> {
        let mut watcher = PollingWatcher::new(self.api.clone(), interval);
        watcher.wait_for_completion(session).await
    }

    /// Submit `workflow` and wait for it using the configured strategy.
    pub async fn execute(&self, workflow: &Value) -> Result<CompletedJob, WatchError> {
        self.execute_with(workflow, self.config.strategy).await
    }

    /// Submit `workflow` and wait for it using `strategy`.
    ///
    /// The deadline is fixed before anything else happens and covers
    /// channel setup, submission and the wait. Under
    /// [`WatchStrategy::Auto`] a channel that cannot be opened falls back
    /// to polling; under [`WatchStrategy::Streaming`] it is an error.
    pub async fn execute_with(
        &self,
        workflow: &Value,
        strategy: WatchStrategy,
    ) -> Result<CompletedJob, WatchError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let ticket = JobTicket::mint();

        let connection = match strategy {
            WatchStrategy::Polling => None,
            WatchStrategy::Streaming => Some(self.open_channel_by(&ticket, deadline).await?),
            WatchStrategy::Auto => match self.open_channel_by(&ticket, deadline).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        ws_url = %self.ws.ws_url(),
                        "Progress channel unavailable, falling back to polling",
                    );
                    None
                }
            },
        };

        let submitted = tokio::time::timeout_at(deadline, self.submit(workflow, &ticket)).await;
        let prompt_id = match submitted {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(prompt_id = %ticket.prompt_id, "Deadline reached while submitting");
                return Err(WatchError::Timeout {
                    prompt_id: ticket.prompt_id,
                    elapsed: started.elapsed(),
                });
            }
        };
        let used = if connection.is_some() {
            WatchStrategy::Streaming
        } else {
            WatchStrategy::Polling
        };
        let mut session = WatchSession::with_deadline(prompt_id, ticket.client_id, used, deadline);

        let history = match connection {
            Some(conn) => self.watch_streaming(conn, &mut session).await?,
            None => {
                self.watch_polling(&mut session, self.config.poll_interval)
                    .await?
            }
        };

        let job = CompletedJob {
            elapsed: started.elapsed(),
            prompt_id: session.prompt_id,
            strategy: used,
            history,
        };
        tracing::info!(
            prompt_id = %job.prompt_id,
            strategy = %job.strategy,
            elapsed_ms = job.elapsed.as_millis() as u64,
            "Job completed",
        );
        Ok(job)
    }

    /// Download the bytes behind an output reference.
    pub async fn resolve(&self, output: &OutputReference) -> Result<Vec<u8>, WatchError> {
        self.api
            .view(&output.filename, &output.subfolder, &output.folder_type)
            .await
            .map_err(|e| WatchError::from_view(e, &output.filename))
    }

    /// Upload an input image and return where the executor stored it.
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        filename: &str,
    ) -> Result<UploadResponse, WatchError> {
        let uploaded = self.api.upload_image(data, filename).await?;
        tracing::debug!(name = %uploaded.name, "Image uploaded");
        Ok(uploaded)
    }

    /// Interrupt whatever the executor is currently running.
    pub async fn interrupt(&self) -> Result<(), WatchError> {
        self.api.interrupt().await?;
        tracing::info!("Interrupt sent");
        Ok(())
    }

    /// True if the executor answers `/system_stats`.
    pub async fn is_reachable(&self) -> bool {
        match self.api.system_stats().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "ComfyUI health check failed");
                false
            }
        }
    }
}
