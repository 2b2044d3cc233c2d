//! Workflow templates served by the gateway.
//!
//! Templates are read once at startup and never mutated; each request
//! builds its own job document with [`Workflow::with_values`]. A template
//! `Foo.json` may ship with `Foo.bindings.json`, which replaces the
//! built-in binding map for that template.

use std::collections::HashMap;
use std::path::Path;

use illustrify_core::error::CoreError;
use illustrify_core::generation::{
    PARAM_CFG, PARAM_FRAME_RATE, PARAM_HEIGHT, PARAM_IMAGE, PARAM_LENGTH, PARAM_NEGATIVE_PROMPT,
    PARAM_PROMPT, PARAM_SEED, PARAM_STEPS, PARAM_WIDTH,
};
use illustrify_core::workflow::{Workflow, WorkflowBindings};
use serde::Serialize;

/// The workflows the gateway knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    TextToImage,
    ImageEdit,
    ImageToVideo,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [Self::TextToImage, Self::ImageEdit, Self::ImageToVideo];

    /// Template filename inside the workflow directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::TextToImage => "Flux-KREA-Image-Gen.json",
            Self::ImageEdit => "Image-Edit-Workflow.json",
            Self::ImageToVideo => "Image-To-Video.json",
        }
    }

    /// Public name shown by `GET /workflows`.
    pub fn name(self) -> &'static str {
        match self {
            Self::TextToImage => "flux-krea-image-gen",
            Self::ImageEdit => "qwen-image-edit",
            Self::ImageToVideo => "wan-image-to-video",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Self::TextToImage => "/api/v1/generate-image",
            Self::ImageEdit => "/api/v1/edit-image",
            Self::ImageToVideo => "/api/v1/image-to-video",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::TextToImage => "Generate images using the Flux-KREA model",
            Self::ImageEdit => "Edit images using the Qwen Image Edit model",
            Self::ImageToVideo => "Generate video from an image using the WAN image-to-video model",
        }
    }

    /// Parameter descriptions shown by `GET /workflows`.
    pub fn parameters(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::TextToImage => &[
                ("prompt", "string (default: \"A beautiful landscape\")"),
                ("negative_prompt", "string (optional)"),
                ("width", "integer (64-2048, default: 1024)"),
                ("height", "integer (64-2048, default: 1024)"),
                ("steps", "integer (1-100, default: 20)"),
                ("cfg", "float (0.1-30, default: 1)"),
                ("seed", "integer (optional, random if not provided)"),
            ],
            Self::ImageEdit => &[
                ("image", "file or base64 string (required)"),
                ("prompt", "string (optional)"),
                ("negative_prompt", "string (optional)"),
                ("steps", "integer (1-100, default: 4)"),
                ("cfg", "float (0.1-30, default: 1)"),
                ("seed", "integer (optional, random if not provided)"),
                ("filename", "string (optional, default: uploaded_image.jpg)"),
            ],
            Self::ImageToVideo => &[
                ("image", "file or base64 string (required)"),
                ("prompt", "string"),
                ("negative_prompt", "string (optional)"),
                ("width", "integer (64-2048, default: 480)"),
                ("height", "integer (64-2048, default: 832)"),
                ("length", "integer (frames, default: 81)"),
                ("steps", "integer (1-100, default: 6)"),
                ("cfg", "float (0.1-30, default: 1)"),
                ("seed", "integer (optional, random if not provided)"),
                ("frame_rate", "integer (default: 32)"),
                ("filename", "string (optional, default: uploaded_image.jpg)"),
            ],
        }
    }

    /// Built-in binding map matching the shipped templates' node ids.
    pub fn default_bindings(self) -> WorkflowBindings {
        match self {
            Self::TextToImage => WorkflowBindings::new()
                .bind(PARAM_PROMPT, "100", "text")
                .bind(PARAM_NEGATIVE_PROMPT, "139", "text")
                .bind(PARAM_WIDTH, "136", "width")
                .bind(PARAM_HEIGHT, "136", "height")
                .bind(PARAM_SEED, "137", "seed")
                .bind(PARAM_STEPS, "137", "steps")
                .bind(PARAM_CFG, "137", "cfg"),
            Self::ImageEdit => WorkflowBindings::new()
                .bind(PARAM_IMAGE, "105", "image")
                .bind(PARAM_PROMPT, "76", "prompt")
                .bind(PARAM_NEGATIVE_PROMPT, "77", "prompt")
                .bind(PARAM_SEED, "3", "seed")
                .bind(PARAM_STEPS, "3", "steps")
                .bind(PARAM_CFG, "3", "cfg"),
            Self::ImageToVideo => WorkflowBindings::new()
                .bind(PARAM_IMAGE, "91", "image")
                .bind(PARAM_PROMPT, "88", "text")
                .bind(PARAM_NEGATIVE_PROMPT, "86", "text")
                .bind(PARAM_WIDTH, "89", "width")
                .bind(PARAM_HEIGHT, "89", "height")
                .bind(PARAM_LENGTH, "89", "length")
                .bind(PARAM_SEED, "81", "noise_seed")
                .bind_offset(PARAM_SEED, "82", "noise_seed", 1)
                .bind(PARAM_STEPS, "81", "steps")
                .bind(PARAM_STEPS, "82", "steps")
                .bind(PARAM_CFG, "81", "cfg")
                .bind(PARAM_CFG, "82", "cfg")
                .bind(PARAM_FRAME_RATE, "62", "frame_rate"),
        }
    }
}

/// An immutable template with its parameter bindings.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub kind: WorkflowKind,
    pub workflow: Workflow,
    pub bindings: WorkflowBindings,
}

impl WorkflowTemplate {
    /// Pair a workflow with bindings, checking that every bound node exists.
    pub fn new(
        kind: WorkflowKind,
        workflow: Workflow,
        bindings: WorkflowBindings,
    ) -> Result<Self, CoreError> {
        bindings.validate_against(&workflow)?;
        Ok(Self {
            kind,
            workflow,
            bindings,
        })
    }

    /// Load `kind`'s template (and optional bindings sidecar) from `dir`.
    pub fn load(dir: &Path, kind: WorkflowKind) -> Result<Self, CoreError> {
        let path = dir.join(kind.file_name());
        let workflow = Workflow::load(&path)?;

        let sidecar = path.with_extension("bindings.json");
        let bindings = if sidecar.is_file() {
            tracing::info!(path = %sidecar.display(), "Using bindings sidecar");
            WorkflowBindings::load(&sidecar)?
        } else {
            kind.default_bindings()
        };

        Self::new(kind, workflow, bindings)
    }
}

/// The templates loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    templates: HashMap<WorkflowKind, WorkflowTemplate>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every known template from `dir`.
    ///
    /// A missing template file is logged and skipped so the remaining
    /// endpoints stay usable; requests for it then fail with 404. A
    /// template that exists but is invalid is an error.
    pub fn load(dir: &Path) -> Result<Self, CoreError> {
        let mut catalog = Self::new();
        for kind in WorkflowKind::ALL {
            match WorkflowTemplate::load(dir, kind) {
                Ok(template) => {
                    tracing::info!(
                        workflow = kind.name(),
                        nodes = template.workflow.len(),
                        "Loaded workflow template",
                    );
                    catalog.insert(template);
                }
                Err(CoreError::NotFound { id, .. }) => {
                    tracing::warn!(workflow = kind.name(), path = %id, "Workflow template missing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, template: WorkflowTemplate) {
        self.templates.insert(template.kind, template);
    }

    pub fn get(&self, kind: WorkflowKind) -> Result<&WorkflowTemplate, CoreError> {
        self.templates.get(&kind).ok_or_else(|| CoreError::NotFound {
            entity: "workflow",
            id: kind.file_name().to_string(),
        })
    }

    pub fn contains(&self, kind: WorkflowKind) -> bool {
        self.templates.contains_key(&kind)
    }
}
