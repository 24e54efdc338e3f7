//! Multipart form parsing and the streaming upload pipeline.
//!
//! A request body is read once into a tagged form ([`NodeForm`] or
//! [`UpdateForm`]). Content fields are decoded, hashed and written to a
//! staged blob while the form is read; if anything about the form turns out
//! to be invalid, the staged blob is aborted before the error is returned.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use bytes::Bytes;
use futures::TryStreamExt;
use stash_core::{
    ArchiveFormat, Attributes, Checksum, ContentEncoding, FileChecksums, FileInfo, NodeId,
    parse_attributes, parse_expiration,
};
use stash_storage::{ObjectStore, StreamingUpload};
use std::io;
use std::pin::Pin;
use time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Read buffer for decoded upload content.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Size limit for small text fields (ids, expiration, flags).
const MAX_TEXT_FIELD_SIZE: usize = 1024 * 1024;

/// File content that has been received and written to storage but not yet
/// made visible.
pub struct StagedContent {
    pub name: String,
    pub size: u64,
    pub md5: Checksum,
    upload: Box<dyn StreamingUpload>,
}

impl std::fmt::Debug for StagedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedContent")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("md5", &self.md5)
            .finish_non_exhaustive()
    }
}

impl StagedContent {
    /// Publish the blob and describe it.
    pub async fn commit(self) -> ApiResult<FileInfo> {
        let written = self.upload.finish().await?;
        if written != self.size {
            return Err(ApiError::Internal(format!(
                "staged {} bytes but storage wrote {written}",
                self.size
            )));
        }
        Ok(FileInfo {
            name: self.name,
            size: self.size,
            checksum: FileChecksums { md5: Some(self.md5) },
        })
    }

    /// Drop the staged blob.
    pub async fn discard(self) {
        if let Err(e) = self.upload.abort().await {
            tracing::warn!(error = %e, "Failed to abort staged upload");
        }
    }
}

/// Fields of a node creation request.
#[derive(Debug, Default)]
pub struct CreateForm {
    pub content: Option<StagedContent>,
    pub attributes: Option<Attributes>,
    pub expiration: Option<Duration>,
}

impl CreateForm {
    pub async fn discard(self) {
        if let Some(content) = self.content {
            content.discard().await;
        }
    }
}

/// A `POST /node` request, resolved.
#[derive(Debug)]
pub enum NodeForm {
    /// Create a node, optionally with content.
    Create(CreateForm),
    /// Export the listed nodes as an archive.
    Archive {
        ids: Vec<NodeId>,
        format: ArchiveFormat,
    },
}

/// A `PUT /node/{id}` request, resolved.
#[derive(Debug, Default, PartialEq)]
pub struct UpdateForm {
    pub attributes: Option<Attributes>,
    pub expiration: Option<Duration>,
    pub remove_expiration: bool,
}

/// Where blob content for a create request is staged.
#[derive(Clone, Copy)]
pub struct Staging<'a> {
    pub storage: &'a dyn ObjectStore,
    pub node_id: NodeId,
}

/// Raw fields collected from the multipart body.
#[derive(Default)]
struct FormParts {
    content: Option<StagedContent>,
    attributes: Option<Attributes>,
    expiration: Option<Duration>,
    remove_expiration: bool,
    ids: Option<Vec<NodeId>>,
    download_url: bool,
    archive_format: Option<ArchiveFormat>,
}

impl FormParts {
    /// Read every field. `staging` is `None` for updates, where content
    /// fields are refused.
    async fn collect(
        &mut self,
        multipart: &mut Multipart,
        staging: Option<Staging<'_>>,
        max_attributes_size: usize,
    ) -> ApiResult<()> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(encoding) = ContentEncoding::from_field(&name) {
                let Some(staging) = staging else {
                    return Err(ApiError::BadRequest(format!(
                        "file content is immutable; field {name} is not allowed on update"
                    )));
                };
                if self.content.is_some() {
                    return Err(ApiError::BadRequest(
                        "only one of upload, gzip or bzip2 may be given".to_string(),
                    ));
                }
                self.content = Some(stage_content(field, encoding, staging).await?);
                continue;
            }

            match name.as_str() {
                "attributes" | "attributes_str" => {
                    if self.attributes.is_some() {
                        return Err(ApiError::BadRequest(
                            "only one of attributes or attributes_str may be given".to_string(),
                        ));
                    }
                    let data = read_bounded(field, max_attributes_size).await?;
                    self.attributes = Some(parse_attributes(&data)?);
                }
                "expiration" => {
                    ensure_unset(self.expiration.is_some(), &name)?;
                    let text = read_text(field).await?;
                    self.expiration = Some(parse_expiration(&text)?);
                }
                "remove_expiration" if staging.is_none() => {
                    read_text(field).await?;
                    self.remove_expiration = true;
                }
                "ids" if staging.is_some() => {
                    ensure_unset(self.ids.is_some(), &name)?;
                    let text = read_text(field).await?;
                    self.ids = Some(parse_id_list(&text)?);
                }
                "download_url" if staging.is_some() => {
                    read_text(field).await?;
                    self.download_url = true;
                }
                "archive_format" if staging.is_some() => {
                    ensure_unset(self.archive_format.is_some(), &name)?;
                    let text = read_text(field).await?;
                    self.archive_format = Some(ArchiveFormat::parse(text.trim())?);
                }
                other => {
                    return Err(ApiError::BadRequest(format!("unknown form field: {other}")));
                }
            }
        }
        Ok(())
    }

    fn check_create(&self) -> ApiResult<()> {
        let archive_fields = self.ids.is_some() || self.archive_format.is_some();
        if !self.download_url {
            if archive_fields {
                return Err(ApiError::BadRequest(
                    "ids and archive_format require download_url".to_string(),
                ));
            }
            return Ok(());
        }
        if self.content.is_some() || self.attributes.is_some() || self.expiration.is_some() {
            return Err(ApiError::BadRequest(
                "an archive request cannot carry content, attributes or expiration".to_string(),
            ));
        }
        if self.ids.is_none() {
            return Err(ApiError::BadRequest(
                "download_url requires an ids list".to_string(),
            ));
        }
        if self.archive_format.is_none() {
            return Err(ApiError::BadRequest(
                "archive_format is required (zip or tar)".to_string(),
            ));
        }
        Ok(())
    }

    fn check_update(&self) -> ApiResult<()> {
        if self.remove_expiration && self.expiration.is_some() {
            return Err(ApiError::BadRequest(
                "expiration and remove_expiration are mutually exclusive".to_string(),
            ));
        }
        if self.attributes.is_none() && self.expiration.is_none() && !self.remove_expiration {
            return Err(ApiError::BadRequest("nothing to update".to_string()));
        }
        Ok(())
    }

    async fn discard(self) {
        if let Some(content) = self.content {
            content.discard().await;
        }
    }

    fn into_node_form(self) -> NodeForm {
        match (self.download_url, self.ids, self.archive_format) {
            (true, Some(ids), Some(format)) => NodeForm::Archive { ids, format },
            _ => NodeForm::Create(CreateForm {
                content: self.content,
                attributes: self.attributes,
                expiration: self.expiration,
            }),
        }
    }
}

/// Read a `POST /node` body.
///
/// Content is staged under `staging.node_id`; on error nothing is left
/// behind in storage.
pub async fn read_node_form(
    mut multipart: Multipart,
    staging: Staging<'_>,
    max_attributes_size: usize,
) -> ApiResult<NodeForm> {
    let mut parts = FormParts::default();
    let checked = match parts
        .collect(&mut multipart, Some(staging), max_attributes_size)
        .await
    {
        Ok(()) => parts.check_create(),
        Err(e) => Err(e),
    };
    if let Err(e) = checked {
        parts.discard().await;
        return Err(e);
    }
    Ok(parts.into_node_form())
}

/// Read a `PUT /node/{id}` body.
pub async fn read_update_form(
    mut multipart: Multipart,
    max_attributes_size: usize,
) -> ApiResult<UpdateForm> {
    let mut parts = FormParts::default();
    parts
        .collect(&mut multipart, None, max_attributes_size)
        .await?;
    parts.check_update()?;
    Ok(UpdateForm {
        attributes: parts.attributes,
        expiration: parts.expiration,
        remove_expiration: parts.remove_expiration,
    })
}

fn ensure_unset(already_set: bool, name: &str) -> ApiResult<()> {
    if already_set {
        return Err(ApiError::BadRequest(format!("field {name} given more than once")));
    }
    Ok(())
}

/// Parse a comma-separated node id list.
pub fn parse_id_list(text: &str) -> ApiResult<Vec<NodeId>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest(
            "ids must list at least one node id".to_string(),
        ));
    }
    text.split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(ApiError::BadRequest(format!("malformed id list: {text:?}")));
            }
            NodeId::parse(part)
                .map_err(|_| ApiError::BadRequest(format!("malformed node id in list: {part:?}")))
        })
        .collect()
}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base == "." || base == ".." {
        return String::new();
    }
    base.chars().filter(|c| !c.is_control()).collect()
}

async fn read_bounded(mut field: Field<'_>, limit: usize) -> ApiResult<Vec<u8>> {
    let name = field.name().unwrap_or_default().to_string();
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read field {name}: {e}")))?
    {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::BadRequest(format!(
                "field {name} exceeds {limit} bytes"
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text(field: Field<'_>) -> ApiResult<String> {
    let data = read_bounded(field, MAX_TEXT_FIELD_SIZE).await?;
    String::from_utf8(data).map_err(|_| ApiError::BadRequest("form field is not UTF-8".to_string()))
}

async fn stage_content(
    field: Field<'_>,
    encoding: ContentEncoding,
    staging: Staging<'_>,
) -> ApiResult<StagedContent> {
    let uploaded_name = sanitize_file_name(field.file_name().unwrap_or_default());
    let name = encoding.stored_name(&uploaded_name);
    let mut upload = staging
        .storage
        .put_stream(&staging.node_id.blob_key())
        .await?;

    match copy_decoded(field, encoding, upload.as_mut()).await {
        Ok((size, md5)) => {
            tracing::debug!(
                node_id = %staging.node_id,
                field = encoding.field_name(),
                size,
                md5 = %md5,
                "Upload staged"
            );
            Ok(StagedContent {
                name,
                size,
                md5,
                upload,
            })
        }
        Err(e) => {
            metrics::record_upload_error(encoding.field_name());
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(error = %abort_err, "Failed to abort staged upload");
            }
            Err(e)
        }
    }
}

/// Decode `field` according to `encoding`, hashing and writing the plain
/// bytes as they arrive.
async fn copy_decoded(
    field: Field<'_>,
    encoding: ContentEncoding,
    upload: &mut dyn StreamingUpload,
) -> ApiResult<(u64, Checksum)> {
    let reader = StreamReader::new(field.map_err(io::Error::other));
    let mut reader: Pin<Box<dyn AsyncRead + Send + '_>> = match encoding {
        ContentEncoding::Plain => Box::pin(reader),
        ContentEncoding::Gzip => {
            let mut decoder = GzipDecoder::new(reader);
            decoder.multiple_members(true);
            Box::pin(decoder)
        }
        ContentEncoding::Bzip2 => {
            let mut decoder = BzDecoder::new(reader);
            decoder.multiple_members(true);
            Box::pin(decoder)
        }
    };

    let mut hasher = Checksum::hasher();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| decode_error(encoding, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
        upload.write(Bytes::copy_from_slice(&buf[..n])).await?;
    }
    Ok((size, hasher.finalize()))
}

fn decode_error(encoding: ContentEncoding, e: &io::Error) -> ApiError {
    match encoding {
        ContentEncoding::Plain => ApiError::BadRequest(format!("failed to read upload: {e}")),
        other => ApiError::BadRequest(format!(
            "corrupt {} content: {e}",
            other.field_name()
        )),
    }
}
