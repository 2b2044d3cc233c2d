//! Completion watching: sessions, strategies, and the error taxonomy.
//!
//! A job is observed either by streaming ([`streaming::StreamingWatcher`])
//! or by polling history ([`polling::PollingWatcher`]). Both implement
//! [`CompletionWatcher`] and resolve to the same [`HistoryEntry`].

pub mod polling;
pub mod streaming;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use illustrify_core::error::CoreError;
use illustrify_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::api::ComfyUIApiError;
use crate::client::ComfyUIClientError;
use crate::history::HistoryEntry;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How completion is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStrategy {
    /// Stream when the progress channel can be opened, poll otherwise.
    #[default]
    Auto,
    Streaming,
    Polling,
}

impl WatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Streaming => "streaming",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for WatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "streaming" | "websocket" | "ws" => Ok(Self::Streaming),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(CoreError::Validation(format!(
                "Unknown watch strategy '{other}' (expected auto, streaming or polling)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Ticket and session
// ---------------------------------------------------------------------------

/// Identifiers minted for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    /// Addresses progress frames to this job's WebSocket.
    pub client_id: String,
    /// Proposed prompt id; the executor may replace it on submit.
    pub prompt_id: String,
}

impl JobTicket {
    /// Mint fresh random identifiers.
    pub fn mint() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            prompt_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// State of one in-flight watch. Lives for a single call.
#[derive(Debug, Clone)]
pub struct WatchSession {
    pub prompt_id: String,
    pub client_id: String,
    /// Strategy actually in use (never `Auto`).
    pub strategy: WatchStrategy,
    pub started_at: Timestamp,
    pub deadline: Instant,
    pub last_node: Option<String>,
    /// Most recent `(value, max)` step progress.
    pub last_progress: Option<(i32, i32)>,
}

impl WatchSession {
    /// Start a session whose deadline is `timeout` from now.
    pub fn new(
        prompt_id: impl Into<String>,
        client_id: impl Into<String>,
        strategy: WatchStrategy,
        timeout: Duration,
    ) -> Self {
        Self::with_deadline(prompt_id, client_id, strategy, Instant::now() + timeout)
    }

    /// Start a session against an already computed deadline.
    pub fn with_deadline(
        prompt_id: impl Into<String>,
        client_id: impl Into<String>,
        strategy: WatchStrategy,
        deadline: Instant,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            client_id: client_id.into(),
            strategy,
            started_at: chrono::Utc::now(),
            deadline,
            last_node: None,
            last_progress: None,
        }
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wall time since the session started.
    pub fn elapsed(&self) -> Duration {
        (chrono::Utc::now() - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub(crate) fn timeout_error(&self) -> WatchError {
        WatchError::Timeout {
            prompt_id: self.prompt_id.clone(),
            elapsed: self.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal failures of a watched job.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The executor rejected the job document.
    #[error("Submission rejected ({status}): {body}")]
    Submission {
        /// HTTP status code.
        status: u16,
        /// Response body text, usually the validation report.
        body: String,
    },

    /// The executor could not be reached.
    #[error("Cannot reach ComfyUI: {0}")]
    Connection(String),

    /// The deadline passed before completion was observed.
    #[error("Timed out waiting for prompt {prompt_id} after {}s", .elapsed.as_secs())]
    Timeout {
        /// Id of the job that was being watched.
        prompt_id: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// A referenced output does not exist on the executor.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Anything else that went wrong talking to the executor.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl WatchError {
    /// Classify a submission failure: non-2xx responses are rejections.
    pub(crate) fn from_submit(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::ApiError { status, body } => Self::Submission { status, body },
            other => other.into(),
        }
    }

    /// Classify a file-retrieval failure: 404 means the output is gone.
    pub(crate) fn from_view(err: ComfyUIApiError, filename: &str) -> Self {
        match err {
            ComfyUIApiError::ApiError { status: 404, .. } => Self::NotFound(filename.to_string()),
            other => other.into(),
        }
    }
}

impl From<ComfyUIApiError> for WatchError {
    fn from(err: ComfyUIApiError) -> Self {
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

impl From<ComfyUIClientError> for WatchError {
    fn from(err: ComfyUIClientError) -> Self {
        match err {
            ComfyUIClientError::Connection(msg) => Self::Connection(msg),
            ComfyUIClientError::Protocol(msg) => Self::Transport(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// A way of waiting for a submitted prompt to finish.
///
/// Implementations must return by `session.deadline` and release whatever
/// they hold (socket, loop) on every exit path.
pub trait CompletionWatcher: Send {
    /// Block until the prompt is finished and return its history entry.
    fn wait_for_completion(
        &mut self,
        session: &mut WatchSession,
    ) -> impl std::future::Future<Output = Result<HistoryEntry, WatchError>> + Send;
}
