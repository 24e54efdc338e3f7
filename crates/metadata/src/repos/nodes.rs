//! Node repository.

use crate::error::MetadataResult;
use crate::models::{NodeRow, NodeUpdate};
use async_trait::async_trait;
use stash_core::NodeQuery;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for node records and their attribute index.
#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Insert a node together with its attribute index rows.
    async fn create_node(&self, node: &NodeRow, index: &[(String, String)]) -> MetadataResult<()>;

    /// Get a node by ID.
    async fn get_node(&self, node_id: Uuid) -> MetadataResult<Option<NodeRow>>;

    /// Apply an update atomically and return the updated row.
    ///
    /// Attribute replacement rewrites the index in the same transaction.
    /// Fails with `NotFound` for unknown nodes.
    async fn update_node(
        &self,
        node_id: Uuid,
        update: &NodeUpdate,
        modified_at: OffsetDateTime,
    ) -> MetadataResult<NodeRow>;

    /// Delete a node and its index rows. Fails with `NotFound` for unknown nodes.
    async fn delete_node(&self, node_id: Uuid) -> MetadataResult<()>;

    /// Evaluate a query, returning one page of rows and the size of the full
    /// matched set.
    async fn query_nodes(&self, query: &NodeQuery) -> MetadataResult<(Vec<NodeRow>, u64)>;

    /// Nodes whose expiration is at or before `now`, oldest first.
    async fn list_expired_nodes(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<NodeRow>>;
}

