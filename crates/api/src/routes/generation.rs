//! Route definitions for the generation endpoints.

use axum::routing::post;
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Routes mounted at `/api/v1`.
///
/// ```text
/// POST /generate-image   -> generate_image
/// POST /edit-image       -> edit_image
/// POST /image-to-video   -> image_to_video
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate-image", post(generation::generate_image))
        .route("/edit-image", post(generation::edit_image))
        .route("/image-to-video", post(generation::image_to_video))
}
