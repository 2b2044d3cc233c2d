//! Generation parameter defaults, validation, and binding values.
//!
//! Each gateway endpoint accepts a loosely-typed `*Options` payload (every
//! field optional), which [`resolve`](ImageOptions::resolve)s into a fully
//! populated, validated `*Params` value. The params then produce the
//! `(name, value)` pairs that [`Workflow::with_values`] writes into the job
//! document.
//!
//! [`Workflow::with_values`]: crate::workflow::Workflow::with_values

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Parameter names (keys of binding maps)
// ---------------------------------------------------------------------------

pub const PARAM_PROMPT: &str = "prompt";
pub const PARAM_NEGATIVE_PROMPT: &str = "negative_prompt";
pub const PARAM_WIDTH: &str = "width";
pub const PARAM_HEIGHT: &str = "height";
pub const PARAM_STEPS: &str = "steps";
pub const PARAM_CFG: &str = "cfg";
pub const PARAM_SEED: &str = "seed";
/// Filename of an image previously uploaded to the executor.
pub const PARAM_IMAGE: &str = "image";
/// Number of video frames.
pub const PARAM_LENGTH: &str = "length";
pub const PARAM_FRAME_RATE: &str = "frame_rate";

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const MIN_CFG: f64 = 0.1;
pub const MAX_CFG: f64 = 30.0;
/// Maximum prompt length in characters (after trimming).
pub const MAX_PROMPT_LENGTH: usize = 1000;
/// Upper bound (inclusive) for randomly drawn seeds.
pub const MAX_RANDOM_SEED: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_IMAGE_PROMPT: &str = "A beautiful landscape";
pub const DEFAULT_IMAGE_NEGATIVE_PROMPT: &str = "Blurry, bad quality";
pub const DEFAULT_IMAGE_DIMENSION: u32 = 1024;
pub const DEFAULT_IMAGE_STEPS: u32 = 20;
pub const DEFAULT_CFG: f64 = 1.0;

pub const DEFAULT_EDIT_STEPS: u32 = 4;

pub const DEFAULT_VIDEO_WIDTH: u32 = 480;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 832;
pub const DEFAULT_VIDEO_LENGTH: u32 = 81;
pub const DEFAULT_VIDEO_STEPS: u32 = 6;
pub const DEFAULT_VIDEO_FRAME_RATE: u32 = 32;
/// Negative prompt tuned for the image-to-video model, which was trained
/// on Chinese captions.
pub const DEFAULT_VIDEO_NEGATIVE_PROMPT: &str = "色调艳丽，过曝，静态，细节模糊不清，字幕，风格，作品，画作，画面，静止，整体发灰，最差质量，低质量，JPEG压缩残留，丑陋的，残缺的，多余的手指，画得不好的手部，画得不好的脸部，畸形的，毁容的，形态畸形的肢体，手指融合，静止不动的画面，杂乱的背景，三条腿，背景人很多，倒着走";

/// Filename used for uploads that arrive without one.
pub const DEFAULT_UPLOAD_FILENAME: &str = "uploaded_image.jpg";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Trim a prompt and enforce the length limit.
pub fn validate_prompt(prompt: &str) -> Result<String, CoreError> {
    let trimmed = prompt.trim();
    if trimmed.chars().count() > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt must be at most {MAX_PROMPT_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate image dimensions and sampler settings.
pub fn validate_image_params(
    width: u32,
    height: u32,
    steps: u32,
    cfg: f64,
) -> Result<(), CoreError> {
    let dims = MIN_DIMENSION..=MAX_DIMENSION;
    if !dims.contains(&width) || !dims.contains(&height) {
        return Err(CoreError::Validation(format!(
            "Width and height must be between {MIN_DIMENSION} and {MAX_DIMENSION} pixels"
        )));
    }
    validate_sampling(steps, cfg)
}

/// Validate sampler step count and guidance scale.
pub fn validate_sampling(steps: u32, cfg: f64) -> Result<(), CoreError> {
    if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
        return Err(CoreError::Validation(format!(
            "Steps must be between {MIN_STEPS} and {MAX_STEPS}"
        )));
    }
    if !(MIN_CFG..=MAX_CFG).contains(&cfg) {
        return Err(CoreError::Validation(format!(
            "CFG must be between {MIN_CFG} and {MAX_CFG}"
        )));
    }
    Ok(())
}

/// Draw a seed in `1..=2^32`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(1..=MAX_RANDOM_SEED)
}

// ---------------------------------------------------------------------------
// Text-to-image
// ---------------------------------------------------------------------------

/// Request payload for text-to-image generation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageOptions {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub seed: Option<u64>,
}

/// Validated text-to-image parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub seed: u64,
}

impl ImageOptions {
    pub fn resolve(self) -> Result<ImageParams, CoreError> {
        let params = ImageParams {
            prompt: validate_prompt(self.prompt.as_deref().unwrap_or(DEFAULT_IMAGE_PROMPT))?,
            negative_prompt: validate_prompt(
                self.negative_prompt
                    .as_deref()
                    .unwrap_or(DEFAULT_IMAGE_NEGATIVE_PROMPT),
            )?,
            width: self.width.unwrap_or(DEFAULT_IMAGE_DIMENSION),
            height: self.height.unwrap_or(DEFAULT_IMAGE_DIMENSION),
            steps: self.steps.unwrap_or(DEFAULT_IMAGE_STEPS),
            cfg: self.cfg.unwrap_or(DEFAULT_CFG),
            seed: self.seed.unwrap_or_else(random_seed),
        };
        validate_image_params(params.width, params.height, params.steps, params.cfg)?;
        Ok(params)
    }
}

impl ImageParams {
    pub fn binding_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            (PARAM_PROMPT, Value::from(self.prompt.as_str())),
            (PARAM_NEGATIVE_PROMPT, Value::from(self.negative_prompt.as_str())),
            (PARAM_WIDTH, Value::from(self.width)),
            (PARAM_HEIGHT, Value::from(self.height)),
            (PARAM_STEPS, Value::from(self.steps)),
            (PARAM_CFG, Value::from(self.cfg)),
            (PARAM_SEED, Value::from(self.seed)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Image edit
// ---------------------------------------------------------------------------

/// Request options for instruction-based image editing. The source image
/// travels separately (base64 or multipart file).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditOptions {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
    pub seed: u64,
}

impl EditOptions {
    pub fn resolve(self) -> Result<EditParams, CoreError> {
        let params = EditParams {
            prompt: validate_prompt(self.prompt.as_deref().unwrap_or_default())?,
            negative_prompt: validate_prompt(self.negative_prompt.as_deref().unwrap_or_default())?,
            steps: self.steps.unwrap_or(DEFAULT_EDIT_STEPS),
            cfg: self.cfg.unwrap_or(DEFAULT_CFG),
            seed: self.seed.unwrap_or_else(random_seed),
        };
        validate_sampling(params.steps, params.cfg)?;
        Ok(params)
    }
}

impl EditParams {
    /// Binding values, including the executor-side name of the uploaded
    /// source image.
    pub fn binding_values(&self, uploaded_image: &str) -> Vec<(&'static str, Value)> {
        vec![
            (PARAM_IMAGE, Value::from(uploaded_image)),
            (PARAM_PROMPT, Value::from(self.prompt.as_str())),
            (PARAM_NEGATIVE_PROMPT, Value::from(self.negative_prompt.as_str())),
            (PARAM_STEPS, Value::from(self.steps)),
            (PARAM_CFG, Value::from(self.cfg)),
            (PARAM_SEED, Value::from(self.seed)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Image-to-video
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoOptions {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub length: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub seed: Option<u64>,
    pub frame_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub length: u32,
    pub steps: u32,
    pub cfg: f64,
    pub seed: u64,
    pub frame_rate: u32,
}

impl VideoOptions {
    pub fn resolve(self) -> Result<VideoParams, CoreError> {
        let params = VideoParams {
            prompt: validate_prompt(self.prompt.as_deref().unwrap_or_default())?,
            negative_prompt: validate_prompt(
                self.negative_prompt
                    .as_deref()
                    .unwrap_or(DEFAULT_VIDEO_NEGATIVE_PROMPT),
            )?,
            width: self.width.unwrap_or(DEFAULT_VIDEO_WIDTH),
            height: self.height.unwrap_or(DEFAULT_VIDEO_HEIGHT),
            length: self.length.unwrap_or(DEFAULT_VIDEO_LENGTH),
            steps: self.steps.unwrap_or(DEFAULT_VIDEO_STEPS),
            cfg: self.cfg.unwrap_or(DEFAULT_CFG),
            seed: self.seed.unwrap_or_else(random_seed),
            frame_rate: self.frame_rate.unwrap_or(DEFAULT_VIDEO_FRAME_RATE),
        };
        validate_image_params(params.width, params.height, params.steps, params.cfg)?;
        if params.length == 0 {
            return Err(CoreError::Validation("Length must be at least 1 frame".into()));
        }
        if params.frame_rate == 0 {
            return Err(CoreError::Validation("Frame rate must be at least 1".into()));
        }
        Ok(params)
    }
}

impl VideoParams {
    pub fn binding_values(&self, uploaded_image: &str) -> Vec<(&'static str, Value)> {
        vec![
            (PARAM_IMAGE, Value::from(uploaded_image)),
            (PARAM_PROMPT, Value::from(self.prompt.as_str())),
            (PARAM_NEGATIVE_PROMPT, Value::from(self.negative_prompt.as_str())),
            (PARAM_WIDTH, Value::from(self.width)),
            (PARAM_HEIGHT, Value::from(self.height)),
            (PARAM_LENGTH, Value::from(self.length)),
            (PARAM_STEPS, Value::from(self.steps)),
            (PARAM_CFG, Value::from(self.cfg)),
            (PARAM_SEED, Value::from(self.seed)),
            (PARAM_FRAME_RATE, Value::from(self.frame_rate)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
