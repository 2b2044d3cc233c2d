//! Completion by polling `GET /history/{prompt_id}`.

use std::time::Duration;

use crate::api::ComfyUIApi;
use crate::history::HistoryEntry;
use crate::watch::{CompletionWatcher, WatchError, WatchSession};

/// Polls the history endpoint at a fixed interval until the entry is
/// complete or the session deadline passes.
///
/// Fetch failures of any kind are treated as transient and retried.
#[derive(Debug, Clone)]
pub struct PollingWatcher {
    api: ComfyUIApi,
    interval: Duration,
}

impl PollingWatcher {
    pub fn new(api: ComfyUIApi, interval: Duration) -> Self {
        Self { api, interval }
    }

    async fn poll_until_complete(&self, session: &mut WatchSession) -> HistoryEntry {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match fetch_entry(&self.api, &session.prompt_id).await {
                Ok(Some(entry)) if entry.is_complete() => {
                    tracing::debug!(
                        prompt_id = %session.prompt_id,
                        attempts,
                        "History entry complete",
                    );
                    return entry;
                }
                Ok(Some(entry)) => {
                    if let Some(node) = entry.current_node() {
                        if session.last_node.as_deref() != Some(node.as_str()) {
                            tracing::debug!(
                                prompt_id = %session.prompt_id,
                                node = %node,
                                "Executing node",
                            );
                            session.last_node = Some(node);
                        }
                    }
                }
                Ok(None) => {
                    tracing::trace!(prompt_id = %session.prompt_id, "Prompt not recorded yet");
                }
                Err(e) => {
                    tracing::debug!(
                        prompt_id = %session.prompt_id,
                        error = %e,
                        "History fetch failed, retrying",
                    );
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl CompletionWatcher for PollingWatcher {
    async fn wait_for_completion(
        &mut self,
        session: &mut WatchSession,
    ) -> Result<HistoryEntry, WatchError> {
        let deadline = session.deadline;
        match tokio::time::timeout_at(deadline, self.poll_until_complete(session)).await {
            Ok(entry) => Ok(entry),
            Err(_) => {
                tracing::warn!(prompt_id = %session.prompt_id, "Polling deadline reached");
                Err(session.timeout_error())
            }
        }
    }
}

/// Fetch and decode the history entry for one prompt.
///
/// `Ok(None)` means the executor has not recorded it yet.
pub(crate) async fn fetch_entry(
    api: &ComfyUIApi,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, WatchError> {
    let response = api.get_history(prompt_id).await?;
    HistoryEntry::from_response(&response, prompt_id)
        .map_err(|e| WatchError::Transport(format!("Malformed history entry: {e}")))
}
