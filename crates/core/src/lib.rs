//! Domain types shared by the Illustrify gateway and render tool.
//!
//! Nothing in this crate performs I/O beyond reading workflow files; the
//! executor protocol lives in `illustrify-comfyui`.

pub mod error;
pub mod generation;
pub mod types;
pub mod workflow;
