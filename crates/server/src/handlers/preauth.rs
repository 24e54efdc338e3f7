//! Preauth URL redemption.

use crate::archive::{plan_entries, stream_archive};
use crate::download::{content_disposition, node_response};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::Response;
use stash_core::{ArchiveFormat, Compression, JobId, NodeId, PreauthRejection};
use stash_metadata::MetadataError;
use time::OffsetDateTime;
use uuid::Uuid;

fn rejection_label(reason: PreauthRejection) -> &'static str {
    match reason {
        PreauthRejection::NotFound => "not_found",
        PreauthRejection::Expired => "expired",
        PreauthRejection::Consumed => "consumed",
    }
}

/// GET /preauth/{token} - Redeem a preauth token and stream its resource.
pub async fn fetch_preauth(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let row = match state
        .metadata
        .consume_preauth_token(&token, OffsetDateTime::now_utc())
        .await
    {
        Ok(row) => row,
        Err(MetadataError::Preauth(reason)) => {
            metrics::PREAUTH_REJECTIONS
                .with_label_values(&[rejection_label(reason)])
                .inc();
            tracing::info!(reason = rejection_label(reason), "Preauth token refused");
            return Err(MetadataError::Preauth(reason).into());
        }
        Err(e) => return Err(e.into()),
    };

    match (row.job_id, row.node_id) {
        (Some(job_id), _) => archive_response(&state, job_id).await,
        (None, Some(node_id)) => {
            let compression = row
                .compression
                .as_deref()
                .map(Compression::parse)
                .transpose()?
                .unwrap_or_default();
            let node = state.load_node(NodeId::from_uuid(node_id)).await?;
            node_response(&state, &node, compression).await
        }
        (None, None) => Err(ApiError::Internal(
            "preauth token is bound to nothing".to_string(),
        )),
    }
}

async fn archive_response(state: &AppState, job_id: Uuid) -> ApiResult<Response> {
    let job_id = JobId::from_uuid(job_id);
    let job = state
        .metadata
        .get_archive_job(*job_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("archive job {job_id}")))?;
    let format = ArchiveFormat::parse(&job.format)
        .map_err(|e| ApiError::Internal(format!("archive job {job_id}: {e}")))?;

    let member_ids = state.metadata.get_archive_job_nodes(*job_id.as_uuid()).await?;
    let mut nodes = Vec::with_capacity(member_ids.len());
    for id in member_ids {
        nodes.push(state.load_node(NodeId::from_uuid(id)).await?);
    }

    metrics::ARCHIVE_FETCHES
        .with_label_values(&[format.as_str()])
        .inc();
    tracing::info!(job_id = %job_id, format = %format, nodes = nodes.len(), "Streaming archive");

    let body = stream_archive(state.storage.clone(), format, plan_entries(&nodes));
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, format.content_type())
        .header(
            CONTENT_DISPOSITION,
            content_disposition(&format!("{job_id}.{format}")),
        )
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}
