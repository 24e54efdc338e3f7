//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use stash_core::{Attributes, Checksum, FileChecksums, FileInfo, Node, NodeId};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Nodes
// =============================================================================

/// Node record. Attributes are stored as a JSON object string.
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub node_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    /// Lowercase hex MD5, NULL for nodes without content.
    pub file_md5: Option<String>,
    pub attributes: String,
    pub owner: Option<String>,
    pub created_on: OffsetDateTime,
    pub last_modified: OffsetDateTime,
    pub expiration: Option<OffsetDateTime>,
}

impl NodeRow {
    pub fn from_node(node: &Node) -> MetadataResult<Self> {
        let attributes = serde_json::to_string(&node.attributes)
            .map_err(|e| MetadataError::Internal(format!("failed to encode attributes: {e}")))?;
        let file_size = i64::try_from(node.file.size).map_err(|_| {
            MetadataError::Constraint(format!("file size {} out of range", node.file.size))
        })?;
        Ok(Self {
            node_id: *node.id.as_uuid(),
            file_name: node.file.name.clone(),
            file_size,
            file_md5: node.file.checksum.md5.map(|c| c.to_hex()),
            attributes,
            owner: node.owner.clone(),
            created_on: node.created_on,
            last_modified: node.last_modified,
            expiration: node.expiration,
        })
    }

    pub fn into_node(self) -> MetadataResult<Node> {
        let attributes: Attributes = serde_json::from_str(&self.attributes).map_err(|e| {
            MetadataError::Internal(format!(
                "corrupt attributes for node {}: {e}",
                self.node_id
            ))
        })?;
        let md5 = self
            .file_md5
            .as_deref()
            .map(Checksum::from_hex)
            .transpose()
            .map_err(|e| {
                MetadataError::Internal(format!("corrupt md5 for node {}: {e}", self.node_id))
            })?;
        Ok(Node {
            id: NodeId::from_uuid(self.node_id),
            file: FileInfo {
                name: self.file_name,
                size: u64::try_from(self.file_size).unwrap_or(0),
                checksum: FileChecksums { md5 },
            },
            attributes,
            owner: self.owner,
            created_on: self.created_on,
            last_modified: self.last_modified,
            expiration: self.expiration,
        })
    }
}

/// Attribute replacement payload: the JSON document and its flattened index.
#[derive(Debug, Clone)]
pub struct AttributeDocument {
    pub json: String,
    pub index: Vec<(String, String)>,
}

impl AttributeDocument {
    pub fn new(attributes: &Attributes) -> MetadataResult<Self> {
        let json = serde_json::to_string(attributes)
            .map_err(|e| MetadataError::Internal(format!("failed to encode attributes: {e}")))?;
        Ok(Self {
            json,
            index: stash_core::query::index_entries(attributes),
        })
    }
}

/// Changes applied to a node in one transaction.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub attributes: Option<AttributeDocument>,
    /// `Some(None)` clears the expiration.
    pub expiration: Option<Option<OffsetDateTime>>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_none() && self.expiration.is_none()
    }
}

// =============================================================================
// Archive jobs and preauth tokens
// =============================================================================

/// Archive job record. Member nodes live in `archive_job_nodes`.
#[derive(Debug, Clone, FromRow)]
pub struct ArchiveJobRow {
    pub job_id: Uuid,
    pub format: String,
    pub requester: Option<String>,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

/// Preauth token record, bound to either an archive job or a single node.
#[derive(Debug, Clone, FromRow)]
pub struct PreauthTokenRow {
    pub token: String,
    pub job_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
    pub compression: Option<String>,
    pub single_use: bool,
    /// One of `active`, `consumed`, `expired`.
    pub state: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
}

// =============================================================================
// Tokens
// =============================================================================

/// Token record.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub token_hash: String,
    pub scopes: String, // JSON array
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}
