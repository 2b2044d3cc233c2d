use axum::routing::{get, post};
use axum::Router;

use crate::handlers::system;
use crate::state::AppState;

/// ```text
/// POST /interrupt   -> interrupt
/// GET  /workflows   -> list_workflows
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/interrupt", post(system::interrupt))
        .route("/workflows", get(system::list_workflows))
}
