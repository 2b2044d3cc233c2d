//! Thin [`reqwest`] wrapper over the executor's REST endpoints.
//!
//! Every method maps one endpoint; status handling is shared so callers see
//! a non-2xx reply as [`ComfyUIApiError::ApiError`] regardless of route.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Timeout for short control requests (interrupt, stats check).
const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// REST handle for one executor. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Older servers omit it, in which case the id we sent is authoritative.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Queue position assigned by the executor.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation problems, normally empty.
    #[serde(default)]
    pub node_errors: Value,
}

/// Body of a successful `POST /upload/image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Stored name; this is what a `LoadImage` input should reference.
    pub name: String,
    /// Subfolder the file was stored under.
    #[serde(default)]
    pub subfolder: String,
    /// Storage folder, normally `input`.
    #[serde(default, rename = "type")]
    pub folder_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport-level failure: connect, DNS, TLS, timeout or body decode.
    #[error("Request to ComfyUI failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The executor answered with a non-2xx status.
    #[error("ComfyUI returned {status}: {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },
}

impl ComfyUIApiError {
    /// True when the server could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect(),
            Self::ApiError { .. } => false,
        }
    }

    /// HTTP status reported by the server, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::ApiError { status, .. } => Some(*status),
        }
    }
}

impl ComfyUIApi {
    /// `api_url` is the HTTP base, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `POST /prompt`. `client_id` selects the WebSocket that receives
    /// progress; `prompt_id` is the id we minted for the job.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
        prompt_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = json!({
            "prompt": workflow,
            "client_id": client_id,
            "prompt_id": prompt_id,
        });
        let response = self.client.post(self.url("prompt")).json(&body).send().await?;
        read_json(response).await
    }

    /// `POST /interrupt`. Stops whatever is executing, not a particular job.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(self.url("interrupt"))
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await?;
        checked(response).await.map(drop)
    }

    /// `GET /history/{prompt_id}`. The body is keyed by prompt id and is
    /// `{}` until the executor has recorded the prompt.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url(&format!("history/{prompt_id}")))
            .send()
            .await?;
        read_json(response).await
    }

    /// `GET /view`: raw bytes of an output, temp or input file.
    pub async fn view(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url("view"))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", folder_type),
            ])
            .send()
            .await?;
        Ok(checked(response).await?.bytes().await?.to_vec())
    }

    /// Multipart `POST /upload/image` with the bytes in the `image` field.
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        filename: &str,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(image_mime_type(filename))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(self.url("upload/image"))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }

    /// `GET /system_stats`, used as a reachability check.
    pub async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url("system_stats"))
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await?;
        read_json(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }
}

/// Pass a 2xx response through; turn anything else into `ApiError` with
/// the body text attached.
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<body unavailable: {e}>"));
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ComfyUIApiError> {
    Ok(checked(response).await?.json::<T>().await?)
}

/// MIME type guessed from the extension; unknown means JPEG.
fn image_mime_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://host:8188/".into());
        assert_eq!(api.api_url(), "http://host:8188");
    }

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(image_mime_type("a.PNG"), "image/png");
        assert_eq!(image_mime_type("b.webp"), "image/webp");
        assert_eq!(image_mime_type("c.jpg"), "image/jpeg");
        assert_eq!(image_mime_type("no_extension"), "image/jpeg");
    }

    #[test]
    fn submit_response_tolerates_missing_fields() {
        let parsed: SubmitResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.prompt_id.is_none());
        assert!(parsed.number.is_none());

        let parsed: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id":"abc","number":3,"node_errors":{}}"#).unwrap();
        assert_eq!(parsed.prompt_id.as_deref(), Some("abc"));
        assert_eq!(parsed.number, Some(3));
    }

    #[test]
    fn api_error_exposes_status() {
        let err = ComfyUIApiError::ApiError {
            status: 404,
            body: "missing".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_connect());
    }
}
