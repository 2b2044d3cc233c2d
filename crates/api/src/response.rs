//! Shared response envelope and payload types for API handlers.
//!
//! All `/api/v1` responses use a `{ "data": ... }` envelope. Use
//! [`DataResponse`] instead of ad-hoc `serde_json::json!({ "data": ... })`.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(DataResponse { data: items }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// A generated image (or video frame), base64-encoded.
#[derive(Debug, Serialize)]
pub struct EncodedImage {
    pub image: String,
    pub format: String,
    pub node_id: String,
    pub filename: String,
}

/// A generated video or animation, base64-encoded.
#[derive(Debug, Serialize)]
pub struct EncodedVideo {
    pub video: String,
    pub format: String,
    pub node_id: String,
    pub filename: String,
}

/// Response for endpoints producing images.
#[derive(Debug, Serialize)]
pub struct ImagesResponse<P: Serialize> {
    pub images: Vec<EncodedImage>,
    pub parameters: P,
}

/// Response for image-to-video.
#[derive(Debug, Serialize)]
pub struct VideoResponse<P: Serialize> {
    pub videos: Vec<EncodedVideo>,
    pub frames: Vec<EncodedImage>,
    pub parameters: P,
}

/// Echoed parameters plus the name the source image was uploaded under.
#[derive(Debug, Serialize)]
pub struct WithUpload<P: Serialize> {
    #[serde(flatten)]
    pub params: P,
    pub original_filename: String,
}

/// Plain message payload.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
