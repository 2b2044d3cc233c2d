//! Execution history records and the output references they carry.
//!
//! `GET /history/{prompt_id}` returns `{}` until the prompt has been
//! recorded, then `{"<prompt_id>": {"status": {...}, "outputs": {...}}}`.
//! Each output node maps to an object such as
//! `{"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Folder type assumed when an output entry omits `type`.
const DEFAULT_FOLDER_TYPE: &str = "output";

/// Status block of a history entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"` once finished.
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Node currently executing, reported by some builds while running.
    #[serde(default)]
    pub current: Option<Value>,
}

/// One prompt's history record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl HistoryEntry {
    /// Extract the entry for `prompt_id` from a `/history/{id}` response.
    ///
    /// `Ok(None)` means the executor has not recorded the prompt yet.
    pub fn from_response(
        response: &Value,
        prompt_id: &str,
    ) -> Result<Option<Self>, serde_json::Error> {
        match response.get(prompt_id) {
            Some(entry) => Self::deserialize(entry).map(Some),
            None => Ok(None),
        }
    }

    /// True once the record describes a finished prompt: some node has
    /// produced a non-empty output list, or the status block says the
    /// prompt is done (with or without outputs).
    pub fn is_complete(&self) -> bool {
        if self.outputs.values().any(node_has_output) {
            return true;
        }
        match &self.status {
            Some(status) => {
                status.completed
                    || matches!(status.status_str.as_deref(), Some("success") | Some("error"))
            }
            None => false,
        }
    }

    /// Node the executor reports as currently running, if any.
    pub fn current_node(&self) -> Option<String> {
        let current = self.status.as_ref()?.current.as_ref()?;
        match current {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Executor-side failure message, if the prompt finished with an error.
    pub fn execution_error(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        let from_messages = status.messages.iter().find_map(|msg| {
            let pair = msg.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            let payload = pair.get(1)?;
            Some(
                payload
                    .get("exception_message")
                    .and_then(Value::as_str)
                    .unwrap_or("execution error")
                    .trim()
                    .to_string(),
            )
        });

        match (status.status_str.as_deref(), from_messages) {
            (_, Some(message)) => Some(message),
            (Some("error"), None) => Some("execution error".to_string()),
            _ => None,
        }
    }

    /// Output references for this entry.
    pub fn output_references(&self) -> Vec<OutputReference> {
        fetch_outputs(&self.outputs)
    }
}

fn node_has_output(node_output: &Value) -> bool {
    node_output
        .as_object()
        .is_some_and(|obj| obj.values().any(|v| v.as_array().is_some_and(|a| !a.is_empty())))
}

// ---------------------------------------------------------------------------
// Output references
// ---------------------------------------------------------------------------

/// What kind of file an output entry is, from the key it was listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Image,
    Video,
    Gif,
}

impl OutputKind {
    /// Output-object keys in emission order.
    pub const ALL: [OutputKind; 3] = [OutputKind::Image, OutputKind::Video, OutputKind::Gif];

    /// Key under which ComfyUI lists outputs of this kind.
    pub fn output_key(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Gif => "gifs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Gif => "gif",
        }
    }
}

/// Pointer to a generated file on the executor. Resolve to bytes with
/// [`JobWatcher::resolve`](crate::watcher::JobWatcher::resolve).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputReference {
    /// Id of the workflow node that produced the file.
    pub node_id: String,
    /// Stored file name.
    pub filename: String,
    /// Subfolder under the storage folder; empty for the top level.
    pub subfolder: String,
    /// Which list of the node's outputs the file came from.
    pub kind: OutputKind,
    /// Executor storage folder (`output`, `temp`, ...), needed by `/view`.
    pub folder_type: String,
}

impl OutputReference {
    /// Lower-cased file extension, if the filename has one.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.filename.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

/// List every file referenced by an outputs index.
///
/// Nodes are visited in id order; within a node, images come before
/// videos and gifs. Entries without a `filename` are skipped. An empty
/// index yields an empty list, which is a valid result.
pub fn fetch_outputs(outputs: &Map<String, Value>) -> Vec<OutputReference> {
    let mut node_ids: Vec<&String> = outputs.keys().collect();
    node_ids.sort_by(|a, b| compare_node_ids(a, b));

    let mut refs = Vec::new();
    for node_id in node_ids {
        let Some(node_output) = outputs.get(node_id).and_then(Value::as_object) else {
            continue;
        };
        for kind in OutputKind::ALL {
            let Some(entries) = node_output.get(kind.output_key()).and_then(Value::as_array) else {
                continue;
            };
            refs.extend(entries.iter().filter_map(|entry| {
                let filename = entry.get("filename")?.as_str()?;
                Some(OutputReference {
                    node_id: node_id.clone(),
                    filename: filename.to_string(),
                    subfolder: entry
                        .get("subfolder")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    kind,
                    folder_type: entry
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_FOLDER_TYPE)
                        .to_string(),
                })
            }));
        }
    }
    refs
}

/// Numeric ids sort numerically, anything else lexically after them.
fn compare_node_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
