//! Application state shared across handlers.

use crate::error::{ApiError, ApiResult};
use crate::visibility::{VisibilityPolicy, policy_for};
use stash_core::config::AppConfig;
use stash_core::{Node, NodeId};
use stash_metadata::MetadataStore;
use stash_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage for node content.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Query scoping policy.
    pub visibility: Arc<dyn VisibilityPolicy>,
}

impl AppState {
    /// Create a new application state using the configured visibility policy.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let visibility = policy_for(config.auth.visibility);
        Self::with_visibility(config, storage, metadata, visibility)
    }

    /// Create a new application state with an explicit visibility policy.
    pub fn with_visibility(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        visibility: Arc<dyn VisibilityPolicy>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            visibility,
        }
    }

    /// Load a node record, failing with NotFound for unknown ids.
    pub async fn load_node(&self, id: NodeId) -> ApiResult<Node> {
        let row = self
            .metadata
            .get_node(*id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("node {id}")))?;
        Ok(row.into_node()?)
    }

    /// Delete a node record and then its blob.
    ///
    /// A blob that is already gone is logged and ignored.
    pub async fn remove_node(&self, node: &Node) -> ApiResult<()> {
        self.metadata.delete_node(*node.id.as_uuid()).await?;
        if node.file.has_content() {
            match self.storage.delete(&node.id.blob_key()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(node_id = %node.id, "Node blob already missing on delete");
                }
                Err(e) => {
                    tracing::error!(node_id = %node.id, error = %e, "Failed to delete node blob");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
