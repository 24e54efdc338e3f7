//! Node endpoints: create, read, query, update, delete and archive requests.

use crate::auth::Caller;
use crate::download;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::preauth::{self, PreauthGrant};
use crate::response::{Page, Reply};
use crate::state::AppState;
use crate::upload::{self, CreateForm, NodeForm, Staging};
use crate::visibility::in_scope;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use stash_core::query::index_entries;
use stash_core::{ArchiveFormat, Compression, FileInfo, Node, NodeId, NodeQuery};
use stash_metadata::models::{AttributeDocument, NodeRow, NodeUpdate};
use std::time::Instant;
use time::OffsetDateTime;

/// Query string as ordered key/value pairs. Flags such as `?download` arrive
/// with an empty value.
type Params = Query<Vec<(String, String)>>;

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn has_param(params: &[(String, String)], key: &str) -> bool {
    params.iter().any(|(k, _)| k == key)
}

fn parse_count(params: &[(String, String)], key: &str) -> ApiResult<Option<u64>> {
    param(params, key)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("{key} must be a non-negative integer")))
        })
        .transpose()
}

fn parse_compression(params: &[(String, String)]) -> ApiResult<Compression> {
    Ok(param(params, "compression")
        .map(Compression::parse)
        .transpose()?
        .unwrap_or_default())
}

/// Unparseable ids name no node.
fn parse_node_id(id: &str) -> ApiResult<NodeId> {
    NodeId::parse(id).map_err(|_| ApiError::NotFound(format!("node {id}")))
}

/// Load a node the caller is allowed to see.
async fn load_visible(state: &AppState, caller: &Caller, id: &str) -> ApiResult<Node> {
    let node = state.load_node(parse_node_id(id)?).await?;
    if !in_scope(&state.visibility.scope(caller), &node) {
        return Err(ApiError::NotFound(format!("node {id}")));
    }
    Ok(node)
}

/// POST /node - Create a node, or request an archive of listed nodes.
pub async fn create_node(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    caller.require_read(&state.config.auth)?;

    let started = Instant::now();
    let node_id = NodeId::new();
    let staging = Staging {
        storage: state.storage.as_ref(),
        node_id,
    };
    let form = upload::read_node_form(
        multipart,
        staging,
        state.config.server.max_attributes_size,
    )
    .await?;

    match form {
        NodeForm::Archive { ids, format } => {
            let grant = archive_by_ids(&state, &caller, &headers, ids, format).await?;
            Ok(Reply::ok(grant).into_response())
        }
        NodeForm::Create(form) => {
            if let Err(e) = caller.require_write(&state.config.auth) {
                form.discard().await;
                return Err(e);
            }
            let node = store_node(&state, &caller, node_id, form).await?;
            metrics::NODES_CREATED.inc();
            metrics::BYTES_UPLOADED.inc_by(node.file.size);
            metrics::UPLOAD_DURATION.observe(started.elapsed().as_secs_f64());
            tracing::info!(
                node_id = %node.id,
                size = node.file.size,
                owner = ?node.owner,
                "Node created"
            );
            Ok(Reply::ok(node).into_response())
        }
    }
}

/// Commit staged content and insert the node record. The blob is removed
/// again if the record cannot be written.
async fn store_node(
    state: &AppState,
    caller: &Caller,
    node_id: NodeId,
    form: CreateForm,
) -> ApiResult<Node> {
    let now = OffsetDateTime::now_utc();
    let expiration = match form.expiration {
        Some(duration) => match now.checked_add(duration) {
            Some(at) => Some(at),
            None => {
                form.discard().await;
                return Err(ApiError::BadRequest("expiration out of range".to_string()));
            }
        },
        None => None,
    };
    let attributes = form.attributes.unwrap_or_default();

    let file = match form.content {
        Some(content) => content.commit().await?,
        None => FileInfo::default(),
    };
    let node = Node {
        id: node_id,
        file,
        attributes,
        owner: caller.identity(),
        created_on: now,
        last_modified: now,
        expiration,
    };

    let inserted = match NodeRow::from_node(&node) {
        Ok(row) => {
            state
                .metadata
                .create_node(&row, &index_entries(&node.attributes))
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = inserted {
        if node.file.has_content()
            && let Err(cleanup) = state.storage.delete(&node.id.blob_key()).await
        {
            tracing::warn!(node_id = %node.id, error = %cleanup, "Failed to remove orphaned blob");
        }
        return Err(e.into());
    }
    Ok(node)
}

async fn archive_by_ids(
    state: &AppState,
    caller: &Caller,
    headers: &HeaderMap,
    ids: Vec<NodeId>,
    format: ArchiveFormat,
) -> ApiResult<PreauthGrant> {
    let scope = state.visibility.scope(caller);
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        let node = state.load_node(id).await?;
        if !in_scope(&scope, &node) {
            return Err(ApiError::NotFound(format!("node {id}")));
        }
        nodes.push(node);
    }
    let base = preauth::base_url(&state.config, headers);
    preauth::issue_for_archive(state, caller, &nodes, format, &base).await
}

/// GET /node - List or query nodes, or request an archive of a query.
pub async fn list_nodes(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Query(params): Params,
) -> ApiResult<Response> {
    caller.require_read(&state.config.auth)?;

    let pairs = params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
    let query = if has_param(&params, "querynode") {
        NodeQuery::node_fields(pairs)?
    } else if has_param(&params, "query") {
        NodeQuery::attributes(pairs)
    } else {
        NodeQuery::default()
    };
    let query = query.with_scope(state.visibility.scope(&caller));

    if let Some(format) = param(&params, "archive") {
        if !has_param(&params, "download_url") {
            return Err(ApiError::BadRequest(
                "archive requires download_url".to_string(),
            ));
        }
        let format = ArchiveFormat::parse(format)?;
        let (rows, _) = state.metadata.query_nodes(&query).await?;
        let nodes = rows
            .into_iter()
            .map(NodeRow::into_node)
            .collect::<Result<Vec<_>, _>>()?;
        let base = preauth::base_url(&state.config, &headers);
        let grant = preauth::issue_for_archive(&state, &caller, &nodes, format, &base).await?;
        return Ok(Reply::ok(grant).into_response());
    }
    if has_param(&params, "download_url") {
        return Err(ApiError::BadRequest(
            "download_url on a listing requires archive=zip|tar".to_string(),
        ));
    }

    let server = &state.config.server;
    let limit = parse_count(&params, "limit")?
        .unwrap_or(server.default_limit)
        .min(server.max_limit);
    let offset = parse_count(&params, "offset")?.unwrap_or(0);

    let (rows, total_count) = state
        .metadata
        .query_nodes(&query.with_page(Some(limit), offset))
        .await?;
    let nodes = rows
        .into_iter()
        .map(NodeRow::into_node)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Reply::page(
        nodes,
        Page {
            limit,
            offset,
            total_count,
        },
    )
    .into_response())
}

/// GET /node/{id} - Node record, content download, or a download URL.
pub async fn get_node(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Params,
) -> ApiResult<Response> {
    caller.require_read(&state.config.auth)?;
    let node = load_visible(&state, &caller, &id).await?;

    if has_param(&params, "download_url") {
        let compression = parse_compression(&params)?;
        let base = preauth::base_url(&state.config, &headers);
        let grant = preauth::issue_for_node(&state, &node, compression, &base).await?;
        return Ok(Reply::ok(grant).into_response());
    }
    if has_param(&params, "download") {
        let compression = parse_compression(&params)?;
        return download::node_response(&state, &node, compression).await;
    }
    Ok(Reply::ok(node).into_response())
}

/// PUT /node/{id} - Replace attributes or change the expiration.
pub async fn update_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Reply<Node>> {
    let node = load_visible(&state, &caller, &id).await?;
    caller.require_modify(node.owner.as_deref(), state.config.auth.anonymous_write)?;

    let form =
        upload::read_update_form(multipart, state.config.server.max_attributes_size).await?;
    let now = OffsetDateTime::now_utc();

    let expiration = if form.remove_expiration {
        Some(None)
    } else {
        match form.expiration {
            Some(duration) => Some(Some(now.checked_add(duration).ok_or_else(|| {
                ApiError::BadRequest("expiration out of range".to_string())
            })?)),
            None => None,
        }
    };
    let update = NodeUpdate {
        attributes: form
            .attributes
            .as_ref()
            .map(AttributeDocument::new)
            .transpose()?,
        expiration,
    };

    let row = state
        .metadata
        .update_node(*node.id.as_uuid(), &update, now)
        .await?;
    tracing::info!(node_id = %node.id, "Node updated");
    Ok(Reply::ok(row.into_node()?))
}

/// DELETE /node/{id} - Remove a node and its content.
pub async fn delete_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Reply<()>> {
    let node = load_visible(&state, &caller, &id).await?;
    caller.require_modify(node.owner.as_deref(), state.config.auth.anonymous_delete)?;

    state.remove_node(&node).await?;
    metrics::NODES_DELETED.inc();
    tracing::info!(node_id = %node.id, "Node deleted");
    Ok(Reply::empty())
}
