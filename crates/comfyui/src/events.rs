//! Progress events observed while a job runs.
//!
//! The watcher does not care about most of what ComfyUI broadcasts; it
//! reduces every text frame to a [`ProgressEvent`] and only acts on the
//! terminal `executing(None)` for its own prompt.

use crate::messages::{ComfyUIMessage, ProgressData};

/// A classified WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A node started executing, or (with `node: None`) the prompt finished.
    Executing {
        node: Option<String>,
        prompt_id: Option<String>,
    },
    /// Step progress inside a long-running node.
    Progress { value: i32, max: i32 },
    /// The executor reported a failure for a prompt.
    ExecutionError {
        prompt_id: String,
        node_id: String,
        message: String,
    },
    /// Anything else: status broadcasts, cache notices, node outputs,
    /// and message types this client does not know about.
    Other,
}

/// Frame-level decode failure: the text was not JSON at all.
#[derive(Debug, thiserror::Error)]
#[error("Malformed frame: {0}")]
pub struct MalformedFrame(#[from] serde_json::Error);

impl ProgressEvent {
    /// True if this is the completion signal for `prompt_id`.
    ///
    /// A terminal event without a prompt id (very old servers) is
    /// accepted as ours, since such servers only report on the
    /// submitting client's socket.
    pub fn is_terminal_for(&self, prompt_id: &str) -> bool {
        match self {
            Self::Executing { node: None, prompt_id: id } => {
                id.as_deref().map_or(true, |id| id == prompt_id)
            }
            _ => false,
        }
    }
}

impl From<ComfyUIMessage> for ProgressEvent {
    fn from(msg: ComfyUIMessage) -> Self {
        match msg {
            ComfyUIMessage::Executing(data) => Self::Executing {
                node: data.node,
                prompt_id: data.prompt_id,
            },
            ComfyUIMessage::Progress(ProgressData { value, max, .. }) => {
                Self::Progress { value, max }
            }
            ComfyUIMessage::ExecutionError(data) => Self::ExecutionError {
                prompt_id: data.prompt_id,
                node_id: data.node_id,
                message: data.exception_message,
            },
            _ => Self::Other,
        }
    }
}

/// Decode and classify a text frame.
///
/// Invalid JSON is an error. Valid JSON that does not match a known
/// message shape is [`ProgressEvent::Other`], so new server message types
/// never break a session.
pub fn classify_frame(text: &str) -> Result<ProgressEvent, MalformedFrame> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(serde_json::from_value::<ComfyUIMessage>(value)
        .map(ProgressEvent::from)
        .unwrap_or(ProgressEvent::Other))
}

/// Completion percentage (0-100) for a progress update.
pub fn progress_percent(value: i32, max: i32) -> i16 {
    if max > 0 {
        ((value as f64 / max as f64) * 100.0).clamp(0.0, 100.0) as i16
    } else {
        0
    }
}
