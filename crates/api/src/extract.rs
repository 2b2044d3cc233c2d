//! Request extractor for endpoints that take a source image.
//!
//! Accepts either a JSON body with a base64 `image` (a `data:` URL prefix
//! is allowed) or a `multipart/form-data` body with an `image` file part.
//! The remaining fields are deserialized into the endpoint's options type.

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use base64::Engine;
use illustrify_core::generation::{
    DEFAULT_UPLOAD_FILENAME, PARAM_IMAGE, PARAM_NEGATIVE_PROMPT, PARAM_PROMPT,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// Multipart text fields that are never coerced to numbers.
const TEXT_FIELDS: [&str; 3] = [PARAM_PROMPT, PARAM_NEGATIVE_PROMPT, FILENAME_FIELD];

const FILENAME_FIELD: &str = "filename";

/// `Json<T>` whose rejections become [`AppError::BadRequest`].
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Raw bytes of the uploaded source image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub data: Vec<u8>,
    /// Name to upload under.
    pub filename: String,
}

/// A source image plus endpoint-specific options.
#[derive(Debug)]
pub struct WithSourceImage<T> {
    pub image: SourceImage,
    pub options: T,
}

impl<S, T> FromRequest<S> for WithSourceImage<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            from_multipart(multipart).await
        } else {
            let ApiJson(body) = ApiJson::<Value>::from_request(req, state).await?;
            from_json(body)
        }
    }
}

fn from_json<T: DeserializeOwned>(body: Value) -> Result<WithSourceImage<T>, AppError> {
    let Value::Object(mut fields) = body else {
        return Err(AppError::BadRequest("Expected a JSON object".into()));
    };

    let encoded = match fields.remove(PARAM_IMAGE) {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => return Err(AppError::BadRequest("No image data provided".into())),
    };
    let filename = match fields.remove(FILENAME_FIELD) {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => DEFAULT_UPLOAD_FILENAME.to_string(),
    };

    Ok(WithSourceImage {
        image: SourceImage {
            data: decode_image(&encoded)?,
            filename,
        },
        options: parse_options(fields)?,
    })
}

async fn from_multipart<T: DeserializeOwned>(
    mut multipart: Multipart,
) -> Result<WithSourceImage<T>, AppError> {
    let mut image: Option<(Option<String>, Vec<u8>)> = None;
    let mut explicit_name: Option<String> = None;
    let mut fields = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == PARAM_IMAGE {
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            image = Some((file_name, data.to_vec()));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        if name == FILENAME_FIELD {
            explicit_name = Some(text).filter(|s| !s.trim().is_empty());
        } else if let Some(value) = form_value(&name, text) {
            fields.insert(name, value);
        }
    }

    let (file_name, data) =
        image.ok_or_else(|| AppError::BadRequest("No image file provided".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded image is empty".into()));
    }
    let filename = explicit_name
        .or(file_name.filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_UPLOAD_FILENAME.to_string());

    Ok(WithSourceImage {
        image: SourceImage { data, filename },
        options: parse_options(fields)?,
    })
}

/// Convert a form field to JSON. Numeric-looking values of non-text
/// fields become numbers; empty non-text fields count as absent.
fn form_value(name: &str, text: String) -> Option<Value> {
    if TEXT_FIELDS.contains(&name) {
        return Some(Value::String(text));
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(number @ Value::Number(_)) => Some(number),
        _ => Some(Value::String(text)),
    }
}

fn parse_options<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::BadRequest(format!("Invalid parameters: {e}")))
}

/// Decode base64 image data, stripping a `data:*;base64,` prefix if present.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, AppError> {
    let payload = encoded.split_once(',').map_or(encoded, |(_, data)| data);
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AppError::BadRequest(format!("Invalid image data: {e}")))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("No image data provided".into()));
    }
    Ok(data)
}
