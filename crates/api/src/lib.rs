//! Illustrify HTTP gateway library.
//!
//! Exposes the building blocks (config, state, error handling, templates,
//! routes) so integration tests and the binary entrypoint can both use
//! them.

pub mod app;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;
pub mod templates;
