//! HTTP service for the stash node store.
//!
//! This crate provides the HTTP surface and the work behind it:
//! - Token and anonymous authentication
//! - Multipart uploads with streaming decompression
//! - Attribute queries with pagination
//! - Single-node downloads and tar/zip archive export
//! - Single-use preauthorized download URLs
//! - Background expiry reaping

pub mod archive;
pub mod auth;
pub mod bootstrap;
pub mod download;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod preauth;
pub mod reaper;
pub mod response;
pub mod routes;
pub mod state;
pub mod upload;
pub mod visibility;

pub use auth::{Caller, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
