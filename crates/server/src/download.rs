//! Single-node content downloads.

use crate::archive::{self, ArchiveEntry, CHUNK_SIZE};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_compression::tokio::bufread::GzipEncoder;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use futures::TryStreamExt;
use stash_core::{ArchiveFormat, Compression, Node};
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};

/// Stream a node's content, optionally wrapped in gzip or a one-entry zip.
pub async fn node_response(
    state: &AppState,
    node: &Node,
    compression: Compression,
) -> ApiResult<Response> {
    if !node.file.has_content() {
        return Err(ApiError::BadRequest(format!("node {} has no file", node.id)));
    }
    let key = node.id.blob_key();
    let file_name = format!("{}{}", node.display_name(), compression.suffix());
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_DISPOSITION, content_disposition(&file_name));

    let response = match compression {
        Compression::None => {
            let meta = state.storage.head(&key).await?;
            let stream = state.storage.get_stream(&key).await?;
            builder
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, meta.size)
                .body(Body::from_stream(stream))
        }
        Compression::Gzip => {
            let stream = state.storage.get_stream(&key).await?;
            let reader = StreamReader::new(stream.map_err(io::Error::other));
            let encoder = GzipEncoder::new(reader);
            builder
                .header(CONTENT_TYPE, "application/gzip")
                .body(Body::from_stream(ReaderStream::with_capacity(
                    encoder, CHUNK_SIZE,
                )))
        }
        Compression::Zip => {
            // Fail before the 200 goes out if the blob is gone.
            state.storage.head(&key).await?;
            let entry = ArchiveEntry {
                name: node.display_name(),
                key,
                mtime: node.last_modified.unix_timestamp(),
            };
            builder
                .header(CONTENT_TYPE, ArchiveFormat::Zip.content_type())
                .body(archive::stream_archive(
                    state.storage.clone(),
                    ArchiveFormat::Zip,
                    vec![entry],
                ))
        }
    };

    tracing::debug!(
        node_id = %node.id,
        compression = compression.as_str(),
        "Streaming node content"
    );
    response.map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

/// `Content-Disposition` value offering `name` as an attachment.
///
/// Characters that cannot appear in a quoted header value are replaced.
pub fn content_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
