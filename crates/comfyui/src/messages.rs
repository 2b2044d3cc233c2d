//! Typed ComfyUI WebSocket frames.
//!
//! Text frames have the shape `{"type": "<kind>", "data": {...}}`. Only
//! the kinds the watcher looks at are modelled; the rest fail to
//! deserialize and are classified as "other" by [`crate::events`].

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue broadcast. The payload shape varies between builds.
    Status(serde_json::Value),

    ExecutionStart(PromptScoped),

    /// Nodes skipped because their outputs were cached.
    ExecutionCached(CachedData),

    /// A node started; `node: None` means the prompt is done.
    Executing(ExecutingData),

    /// Sampler step progress.
    Progress(ProgressData),

    /// A node produced output.
    Executed(ExecutedData),

    ExecutionError(ErrorData),

    ExecutionInterrupted(InterruptedData),

    /// Newer builds send this right before the final `executing`.
    ExecutionSuccess(PromptScoped),
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptScoped {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    /// Absent on old servers that run one prompt per client at a time.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Parse a text frame. Unknown `type` values are an error.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
