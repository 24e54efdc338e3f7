//! Service description and health endpoints.

use crate::error::{ApiError, ApiResult};
use crate::response::Reply;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use serde::Serialize;

/// Which operations anonymous callers may perform.
#[derive(Debug, Serialize)]
pub struct AnonymousPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

/// Service description.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: &'static str,
    pub url: String,
    pub anonymous_permissions: AnonymousPermissions,
}

/// GET / - Describe the service.
pub async fn service_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Reply<ServiceInfo>> {
    let auth = &state.config.auth;
    Ok(Reply::ok(ServiceInfo {
        id: "stash",
        kind: "node store",
        version: env!("CARGO_PKG_VERSION"),
        url: crate::preauth::base_url(&state.config, &headers),
        anonymous_permissions: AnonymousPermissions {
            read: auth.anonymous_read,
            write: auth.anonymous_write,
            delete: auth.anonymous_delete,
        },
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: &'static str,
}

/// GET /health - Check metadata and storage connectivity.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Reply<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Reply::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.storage.backend_name(),
    }))
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}
