//! Preauthorized download URLs.
//!
//! A preauth token is a random secret bound to one resource (an archive job
//! or a single node) with an expiry. Redeeming it needs no credential; single
//! use tokens are consumed atomically by the metadata store.

use crate::auth::{Caller, generate_secret};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use serde::Serialize;
use stash_core::config::AppConfig;
use stash_core::{ArchiveFormat, ArchiveJob, Compression, Node, PreauthResource};
use stash_metadata::models::{ArchiveJobRow, PreauthTokenRow};
use time::OffsetDateTime;

/// Returned when a preauth URL is issued.
#[derive(Debug, Clone, Serialize)]
pub struct PreauthGrant {
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_till: OffsetDateTime,
}

/// Base URL clients should use to reach this service.
///
/// Uses `server.api_url` when configured, otherwise the request's Host
/// header, otherwise the bind address.
pub fn base_url(config: &AppConfig, headers: &HeaderMap) -> String {
    if let Some(url) = config.server.api_url.as_deref() {
        return url.trim_end_matches('/').to_string();
    }
    match headers.get(HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("http://{host}"),
        None => format!("http://{}", config.server.bind),
    }
}

/// Create a preauth token for `resource` and return its URL.
pub async fn issue(
    state: &AppState,
    resource: &PreauthResource,
    single_use: bool,
    base_url: &str,
) -> ApiResult<PreauthGrant> {
    let now = OffsetDateTime::now_utc();
    let expires_at = now + state.config.preauth.ttl();
    let token = generate_secret();

    let (job_id, node_id, compression) = match resource {
        PreauthResource::Archive(job_id) => (Some(*job_id.as_uuid()), None, None),
        PreauthResource::Node {
            node_id,
            compression,
        } => (
            None,
            Some(*node_id.as_uuid()),
            Some(compression.as_str().to_string()),
        ),
    };

    state
        .metadata
        .create_preauth_token(&PreauthTokenRow {
            token: token.clone(),
            job_id,
            node_id,
            compression,
            single_use,
            state: "active".to_string(),
            created_at: now,
            expires_at,
            consumed_at: None,
        })
        .await?;

    Ok(PreauthGrant {
        url: format!("{base_url}/preauth/{token}"),
        valid_till: expires_at,
    })
}

/// Issue a download URL for one node's content.
pub async fn issue_for_node(
    state: &AppState,
    node: &Node,
    compression: Compression,
    base_url: &str,
) -> ApiResult<PreauthGrant> {
    if !node.file.has_content() {
        return Err(ApiError::BadRequest(format!("node {} has no file", node.id)));
    }
    let resource = PreauthResource::Node {
        node_id: node.id,
        compression,
    };
    let grant = issue(state, &resource, state.config.preauth.node_single_use, base_url).await?;
    tracing::info!(node_id = %node.id, compression = compression.as_str(), "Issued node download URL");
    Ok(grant)
}

/// Freeze `nodes` into an archive job and issue its single-use URL.
///
/// Every node must have content and every blob must exist; the job is only
/// marked ready once that holds.
pub async fn issue_for_archive(
    state: &AppState,
    caller: &Caller,
    nodes: &[Node],
    format: ArchiveFormat,
    base_url: &str,
) -> ApiResult<PreauthGrant> {
    if nodes.is_empty() {
        return Err(ApiError::BadRequest(
            "archive selection matched no nodes".to_string(),
        ));
    }
    for node in nodes {
        if !node.file.has_content() {
            return Err(ApiError::BadRequest(format!(
                "node {} has no file and cannot be archived",
                node.id
            )));
        }
        if !state.storage.exists(&node.id.blob_key()).await? {
            return Err(ApiError::NotFound(format!("content of node {}", node.id)));
        }
    }

    let job = ArchiveJob::new(
        nodes.iter().map(|node| node.id),
        format,
        caller.identity(),
        state.config.preauth.ttl(),
    );
    let members: Vec<_> = job.node_ids.iter().map(|id| *id.as_uuid()).collect();
    state
        .metadata
        .create_archive_job(
            &ArchiveJobRow {
                job_id: *job.id.as_uuid(),
                format: job.format.as_str().to_string(),
                requester: job.requester.clone(),
                state: job.state.as_str().to_string(),
                created_at: job.created_at,
                expires_at: job.expires_at,
                finished_at: None,
            },
            &members,
        )
        .await?;

    if !state.metadata.mark_archive_job_ready(*job.id.as_uuid()).await? {
        return Err(ApiError::Conflict(format!(
            "archive job {} is no longer pending",
            job.id
        )));
    }

    let grant = issue(state, &PreauthResource::Archive(job.id), true, base_url).await?;
    metrics::ARCHIVES_CREATED
        .with_label_values(&[format.as_str()])
        .inc();
    tracing::info!(
        job_id = %job.id,
        format = %format,
        nodes = members.len(),
        "Archive job ready"
    );
    Ok(grant)
}
