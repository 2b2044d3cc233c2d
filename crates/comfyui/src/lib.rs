//! ComfyUI job watcher.
//!
//! Submits workflow documents to a ComfyUI executor, observes completion
//! by streaming progress frames or by polling history under a deadline,
//! and resolves the resulting output references to bytes.

pub mod api;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod watch;
pub mod watcher;

pub use history::{fetch_outputs, HistoryEntry, OutputKind, OutputReference};
pub use watch::{CompletionWatcher, JobTicket, WatchError, WatchSession, WatchStrategy};
pub use watcher::{CompletedJob, JobWatcher, WatcherConfig};
