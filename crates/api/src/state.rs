use std::sync::Arc;

use illustrify_comfyui::JobWatcher;

use crate::config::ServerConfig;
use crate::templates::WorkflowCatalog;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job watcher for the configured ComfyUI instance. Holds no
    /// per-job state, so all requests share it.
    pub watcher: Arc<JobWatcher>,
    /// Workflow templates loaded at startup.
    pub catalog: Arc<WorkflowCatalog>,
}

impl AppState {
    pub fn new(config: ServerConfig, catalog: WorkflowCatalog) -> Self {
        let watcher = JobWatcher::new(config.comfyui.clone());
        Self {
            config: Arc::new(config),
            watcher: Arc::new(watcher),
            catalog: Arc::new(catalog),
        }
    }
}
