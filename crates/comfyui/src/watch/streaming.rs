//! Completion by reading the progress WebSocket.
//!
//! The socket must be opened (with the job's `client_id`) before the job
//! is submitted, otherwise a fast job can finish before we listen.

use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClientError, ComfyUIConnection, WsStream};
use crate::events::{classify_frame, progress_percent, ProgressEvent};
use crate::history::HistoryEntry;
use crate::watch::polling::fetch_entry;
use crate::watch::{CompletionWatcher, WatchError, WatchSession};

/// Upper bound on the close handshake while time remains.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Close allowance once the deadline has passed; a timed-out session
/// overruns its deadline by at most this much.
const LATE_CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Waits for the terminal `executing` frame, then fetches history.
///
/// Owns its connection; the socket is closed when the wait ends,
/// whatever the outcome.
pub struct StreamingWatcher {
    api: ComfyUIApi,
    connection: Option<ComfyUIConnection>,
    poll_interval: Duration,
}

impl StreamingWatcher {
    /// * `poll_interval` - retry interval for the history fetch that
    ///   follows the terminal event.
    pub fn new(api: ComfyUIApi, connection: ComfyUIConnection, poll_interval: Duration) -> Self {
        Self {
            api,
            connection: Some(connection),
            poll_interval,
        }
    }

    /// Re-fetch history until the executor has recorded the prompt.
    async fn fetch_until_recorded(&self, prompt_id: &str) -> Result<HistoryEntry, WatchError> {
        loop {
            if let Some(entry) = fetch_entry(&self.api, prompt_id).await? {
                return Ok(entry);
            }
            tracing::debug!(
                prompt_id = %prompt_id,
                "Terminal event seen but history not recorded yet",
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl CompletionWatcher for StreamingWatcher {
    async fn wait_for_completion(
        &mut self,
        session: &mut WatchSession,
    ) -> Result<HistoryEntry, WatchError> {
        let connection = self.connection.take().ok_or_else(|| {
            WatchError::Connection("Progress channel was already consumed".to_string())
        })?;
        let deadline = session.deadline;
        let mut ws = connection.ws_stream;

        let outcome =
            tokio::time::timeout_at(deadline, read_until_terminal(&mut ws, session)).await;
        close_stream(ws, &session.prompt_id, close_grace(session.remaining())).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(prompt_id = %session.prompt_id, "Streaming deadline reached");
                return Err(session.timeout_error());
            }
        }

        match tokio::time::timeout_at(deadline, self.fetch_until_recorded(&session.prompt_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(session.timeout_error()),
        }
    }
}

/// Read frames until the prompt finishes.
///
/// Binary preview frames are dropped. The stream closing or failing before
/// the terminal event is a protocol error.
async fn read_until_terminal(
    ws: &mut WsStream,
    session: &mut WatchSession,
) -> Result<(), WatchError> {
    while let Some(msg_result) = ws.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = classify_frame(&text)
                    .map_err(|e| ComfyUIClientError::Protocol(e.to_string()))?;
                if event.is_terminal_for(&session.prompt_id) {
                    tracing::debug!(prompt_id = %session.prompt_id, "Execution finished");
                    return Ok(());
                }
                if observe(session, event) {
                    return Ok(());
                }
            }
            Ok(Message::Binary(data)) => {
                tracing::trace!(bytes = data.len(), "Discarding binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "WebSocket closed before completion: {frame:?}"
                ))
                .into());
            }
            Err(e) => {
                return Err(
                    ComfyUIClientError::Protocol(format!("WebSocket receive error: {e}")).into(),
                );
            }
        }
    }
    Err(ComfyUIClientError::Protocol("WebSocket stream ended before completion".to_string()).into())
}

/// Record a non-terminal event on the session. Returns true if the event
/// ends the wait (an execution error for this prompt).
fn observe(session: &mut WatchSession, event: ProgressEvent) -> bool {
    match event {
        ProgressEvent::Executing {
            node: Some(node),
            prompt_id,
        } => {
            if prompt_id.as_deref().is_none_or(|id| id == session.prompt_id) {
                tracing::debug!(prompt_id = %session.prompt_id, node = %node, "Executing node");
                session.last_node = Some(node);
            }
            false
        }
        ProgressEvent::Progress { value, max } => {
            tracing::debug!(
                prompt_id = %session.prompt_id,
                value,
                max,
                percent = progress_percent(value, max),
                "Generation progress",
            );
            session.last_progress = Some((value, max));
            false
        }
        ProgressEvent::ExecutionError {
            prompt_id,
            node_id,
            message,
        } if prompt_id == session.prompt_id => {
            tracing::warn!(
                prompt_id = %prompt_id,
                node_id = %node_id,
                error = %message,
                "ComfyUI reported an execution error",
            );
            true
        }
        _ => false,
    }
}

/// Time allowed for the close handshake given what is left of the deadline.
fn close_grace(remaining: Duration) -> Duration {
    CLOSE_GRACE.min(remaining + LATE_CLOSE_GRACE)
}

async fn close_stream(mut ws: WsStream, prompt_id: &str, grace: Duration) {
    match tokio::time::timeout(grace, ws.close(None)).await {
        Ok(Ok(())) => tracing::trace!(prompt_id = %prompt_id, "Progress channel closed"),
        Ok(Err(e)) => {
            tracing::trace!(prompt_id = %prompt_id, error = %e, "Progress channel close failed")
        }
        Err(_) => tracing::debug!(prompt_id = %prompt_id, "Progress channel close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::watch::WatchStrategy;

    fn session() -> WatchSession {
        WatchSession::new("p1", "c1", WatchStrategy::Streaming, Duration::from_secs(5))
    }

    #[test]
    fn observe_tracks_node_and_progress() {
        let mut s = session();
        assert!(!observe(
            &mut s,
            ProgressEvent::Executing {
                node: Some("137".into()),
                prompt_id: Some("p1".into()),
            }
        ));
        assert!(!observe(&mut s, ProgressEvent::Progress { value: 3, max: 20 }));
        assert_eq!(s.last_node.as_deref(), Some("137"));
        assert_eq!(s.last_progress, Some((3, 20)));
    }

    #[test]
    fn observe_ignores_other_prompts() {
        let mut s = session();
        observe(
            &mut s,
            ProgressEvent::Executing {
                node: Some("9".into()),
                prompt_id: Some("someone-else".into()),
            },
        );
        assert!(s.last_node.is_none());
        assert!(!observe(
            &mut s,
            ProgressEvent::ExecutionError {
                prompt_id: "someone-else".into(),
                node_id: "1".into(),
                message: "boom".into(),
            }
        ));
    }

    #[test]
    fn own_execution_error_ends_the_wait() {
        let mut s = session();
        assert!(observe(
            &mut s,
            ProgressEvent::ExecutionError {
                prompt_id: "p1".into(),
                node_id: "5".into(),
                message: "OOM".into(),
            }
        ));
    }

    #[test]
    fn close_grace_shrinks_with_the_deadline() {
        assert_eq!(close_grace(Duration::from_secs(60)), CLOSE_GRACE);
        assert_eq!(close_grace(Duration::from_millis(500)), Duration::from_millis(600));
        assert_eq!(close_grace(Duration::ZERO), LATE_CLOSE_GRACE);
    }
}
