//! Bootstrap admin token marker.

use crate::error::MetadataResult;
use crate::models::TokenRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Tracks which token was created from the configured admin token hash.
#[async_trait]
pub trait BootstrapRepo: Send + Sync {
    /// Get the active bootstrap token ID, if set.
    async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>>;

    /// Insert `token`, revoke the previous bootstrap token (if any) and point
    /// the marker at the new token, all in one transaction.
    ///
    /// Returns the ID of the revoked token.
    async fn rotate_bootstrap_token(&self, token: &TokenRow) -> MetadataResult<Option<Uuid>>;
}
