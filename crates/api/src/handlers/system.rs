//! Handlers for executor control and discovery.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::{DataResponse, MessageResponse};
use crate::state::AppState;
use crate::templates::WorkflowKind;

/// One entry of `GET /workflows`.
#[derive(Debug, Serialize)]
pub struct WorkflowInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub endpoint: &'static str,
    pub method: &'static str,
    /// False when the template file was not found at startup.
    pub available: bool,
    pub parameters: BTreeMap<&'static str, &'static str>,
}

/// POST /api/v1/interrupt
///
/// Interrupts whatever ComfyUI is running right now, not a specific job.
pub async fn interrupt(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.watcher.interrupt().await?;
    Ok(Json(DataResponse {
        data: MessageResponse {
            message: "Generation interrupted successfully".to_string(),
        },
    }))
}

/// GET /api/v1/workflows
pub async fn list_workflows(State(state): State<AppState>) -> impl IntoResponse {
    let workflows: Vec<WorkflowInfo> = WorkflowKind::ALL
        .into_iter()
        .map(|kind| WorkflowInfo {
            name: kind.name(),
            description: kind.description(),
            endpoint: kind.endpoint(),
            method: "POST",
            available: state.catalog.contains(kind),
            parameters: kind.parameters().iter().copied().collect(),
        })
        .collect();

    Json(DataResponse { data: workflows })
}
