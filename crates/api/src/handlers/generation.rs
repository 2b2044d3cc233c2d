//! Handlers for the generation endpoints.
//!
//! Routes:
//! - `POST /generate-image`  text-to-image
//! - `POST /edit-image`      instruction-based image edit
//! - `POST /image-to-video`  image-to-video
//!
//! Each request resolves its options, builds a job document from the
//! immutable template, runs it through the job watcher, then downloads
//! and base64-encodes the outputs.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use illustrify_comfyui::{CompletedJob, OutputKind, OutputReference};
use illustrify_core::generation::{EditOptions, ImageOptions, VideoOptions};
use illustrify_core::workflow::Workflow;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::extract::{ApiJson, SourceImage, WithSourceImage};
use crate::response::{
    DataResponse, EncodedImage, EncodedVideo, ImagesResponse, VideoResponse, WithUpload,
};
use crate::state::AppState;
use crate::templates::WorkflowKind;

/// POST /api/v1/generate-image
pub async fn generate_image(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ImageOptions>,
) -> AppResult<impl IntoResponse> {
    let params = input.resolve()?;
    tracing::info!(
        prompt = %params.prompt,
        width = params.width,
        height = params.height,
        seed = params.seed,
        "Generating image",
    );

    let job = build_job(&state, WorkflowKind::TextToImage, params.binding_values())?;
    let completed = run_job(&state, &job).await?;
    let images = encode_images(&state, &completed.outputs()).await?;

    Ok(Json(DataResponse {
        data: ImagesResponse {
            images,
            parameters: params,
        },
    }))
}

/// POST /api/v1/edit-image
///
/// Accepts JSON with a base64 `image` or a multipart form with an `image`
/// file. The source image is uploaded to ComfyUI before the job runs.
pub async fn edit_image(
    State(state): State<AppState>,
    input: WithSourceImage<EditOptions>,
) -> AppResult<impl IntoResponse> {
    let params = input.options.resolve()?;
    let uploaded = upload_source(&state, input.image).await?;
    tracing::info!(prompt = %params.prompt, image = %uploaded, seed = params.seed, "Editing image");

    let job = build_job(&state, WorkflowKind::ImageEdit, params.binding_values(&uploaded))?;
    let completed = run_job(&state, &job).await?;
    let images = encode_images(&state, &completed.outputs()).await?;

    Ok(Json(DataResponse {
        data: ImagesResponse {
            images,
            parameters: WithUpload {
                params,
                original_filename: uploaded,
            },
        },
    }))
}

/// POST /api/v1/image-to-video
///
/// Video and gif outputs are returned as `videos`; image outputs (frame
/// previews) as `frames`.
pub async fn image_to_video(
    State(state): State<AppState>,
    input: WithSourceImage<VideoOptions>,
) -> AppResult<impl IntoResponse> {
    let params = input.options.resolve()?;
    let uploaded = upload_source(&state, input.image).await?;
    tracing::info!(
        prompt = %params.prompt,
        image = %uploaded,
        length = params.length,
        seed = params.seed,
        "Generating video",
    );

    let job = build_job(&state, WorkflowKind::ImageToVideo, params.binding_values(&uploaded))?;
    let completed = run_job(&state, &job).await?;

    let (video_refs, frame_refs): (Vec<_>, Vec<_>) = completed
        .outputs()
        .into_iter()
        .partition(|r| matches!(r.kind, OutputKind::Video | OutputKind::Gif));

    let mut videos = Vec::with_capacity(video_refs.len());
    for output in &video_refs {
        let (data, format) = fetch_encoded(&state, output, "mp4").await?;
        videos.push(EncodedVideo {
            video: data,
            format,
            node_id: output.node_id.clone(),
            filename: output.filename.clone(),
        });
    }
    let frames = encode_images(&state, &frame_refs).await?;
    tracing::info!(videos = videos.len(), frames = frames.len(), "Video generation finished");

    Ok(Json(DataResponse {
        data: VideoResponse {
            videos,
            frames,
            parameters: WithUpload {
                params,
                original_filename: uploaded,
            },
        },
    }))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Build a job document from `kind`'s template and the given values.
fn build_job<'a>(
    state: &AppState,
    kind: WorkflowKind,
    values: impl IntoIterator<Item = (&'a str, Value)>,
) -> AppResult<Workflow> {
    let template = state.catalog.get(kind)?;
    Ok(template.workflow.with_values(&template.bindings, values)?)
}

/// Submit and wait. An executor-side failure becomes
/// [`AppError::ExecutionFailed`].
async fn run_job(state: &AppState, job: &Workflow) -> AppResult<CompletedJob> {
    let completed = state.watcher.execute(&job.to_value()).await?;
    if let Some(message) = completed.execution_error() {
        tracing::warn!(prompt_id = %completed.prompt_id, error = %message, "Job failed on ComfyUI");
        return Err(AppError::ExecutionFailed(message));
    }
    Ok(completed)
}

/// Upload the source image and return the value to put in the workflow's
/// image input.
async fn upload_source(state: &AppState, image: SourceImage) -> AppResult<String> {
    let uploaded = state.watcher.upload_image(image.data, &image.filename).await?;
    Ok(if uploaded.subfolder.is_empty() {
        uploaded.name
    } else {
        format!("{}/{}", uploaded.subfolder, uploaded.name)
    })
}

async fn encode_images(
    state: &AppState,
    outputs: &[OutputReference],
) -> AppResult<Vec<EncodedImage>> {
    let mut images = Vec::with_capacity(outputs.len());
    for output in outputs {
        let (data, format) = fetch_encoded(state, output, "png").await?;
        images.push(EncodedImage {
            image: data,
            format,
            node_id: output.node_id.clone(),
            filename: output.filename.clone(),
        });
    }
    Ok(images)
}

/// Download one output and return `(base64, format)`.
async fn fetch_encoded(
    state: &AppState,
    output: &OutputReference,
    default_format: &str,
) -> AppResult<(String, String)> {
    let bytes = state.watcher.resolve(output).await?;
    let format = output
        .extension()
        .unwrap_or_else(|| default_format.to_string());
    Ok((base64::engine::general_purpose::STANDARD.encode(bytes), format))
}
