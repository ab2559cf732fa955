//! Service level HTTP endpoints and the OpenAPI document.
//!
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod openapi;

pub use health::MISC_TAG;
