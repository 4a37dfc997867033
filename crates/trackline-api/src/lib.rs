//! Trackline API Library
//!
//! HTTP handlers, request services and process wiring for the audio pipeline.

mod api_doc;
mod handlers;
pub mod services;
pub mod setup;

pub mod auth;
pub mod error;
pub mod state;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
