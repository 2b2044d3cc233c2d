pub mod generation;
pub mod health;
pub mod system;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generate-image                                  text-to-image (POST)
/// /edit-image                                      image edit (POST, JSON or multipart)
/// /image-to-video                                  image-to-video (POST, JSON or multipart)
///
/// /interrupt                                       interrupt current execution (POST)
/// /workflows                                       list workflows (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(generation::router())
        .merge(system::router())
}
