//! Control-plane API models
//!
//! Request and response bodies for the workspace control-plane REST API.
//! Nested fields (environment, volume mappings) are typed structures rather
//! than JSON strings embedded in JSON.

pub mod models;

pub use models::*;
