//! Admin token initialization.

use anyhow::{Context, Result, bail};
use stash_core::config::AdminConfig;
use stash_core::token::TokenScope;
use stash_metadata::MetadataStore;
use stash_metadata::models::TokenRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the configured admin token exists, rotating the previous one if needed.
///
/// If the token hash changes between restarts, the previous admin token is
/// revoked in the same transaction that creates the new one.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    // auth::hash_token produces lowercase hex
    let hash = config
        .token_hash
        .strip_prefix("sha256:")
        .unwrap_or(&config.token_hash)
        .to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); use a new token hash",
                existing.token_id
            );
        }
        let now = OffsetDateTime::now_utc();
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={}); \
                 use a new token hash",
                existing.token_id,
                expires_at
            );
        }
        tracing::debug!(token_id = %existing.token_id, "Admin token already exists");
        return Ok(());
    }

    let scopes = config
        .token_scopes
        .clone()
        .unwrap_or_else(|| vec![TokenScope::NodeAdmin.as_str().to_string()]);
    TokenScope::parse_grant(&scopes).context("invalid admin.token_scopes")?;

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        token_hash: hash,
        scopes: serde_json::to_string(&scopes)?,
        expires_at: None,
        revoked_at: None,
        created_at: OffsetDateTime::now_utc(),
        last_used_at: None,
        description: config.token_description.clone(),
    };

    if let Some(previous) = metadata.rotate_bootstrap_token(&token).await? {
        tracing::info!(token_id = %previous, "Previous admin token revoked");
    }
    tracing::info!(token_id = %token.token_id, "Admin token created");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_token;
    use stash_metadata::SqliteStore;
    use stash_metadata::repos::TokenRepo;
    use tempfile::tempdir;

    fn admin_config(secret: &str) -> AdminConfig {
        AdminConfig {
            token_hash: hash_token(secret),
            token_scopes: None,
            token_description: Some("admin".to_string()),
        }
    }

    #[tokio::test]
    async fn test_creates_then_reuses_admin_token() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("m.db"), None).await.unwrap();

        ensure_admin_token(&store, &admin_config("first")).await.unwrap();
        let first = store
            .get_token_by_hash(&hash_token("first"))
            .await
            .unwrap()
            .unwrap();
        assert!(first.scopes.contains("node:admin"));

        ensure_admin_token(&store, &admin_config("first")).await.unwrap();
        assert_eq!(store.list_tokens().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_revokes_previous_token() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("m.db"), None).await.unwrap();

        ensure_admin_token(&store, &admin_config("old")).await.unwrap();
        ensure_admin_token(&store, &admin_config("new")).await.unwrap();

        let old = store
            .get_token_by_hash(&hash_token("old"))
            .await
            .unwrap()
            .unwrap();
        assert!(old.revoked_at.is_some());

        // The revoked hash cannot be reinstated.
        assert!(
            ensure_admin_token(&store, &admin_config("old"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_rejects_malformed_hash() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("m.db"), None).await.unwrap();
        let config = AdminConfig {
            token_hash: "not-hex".to_string(),
            token_scopes: None,
            token_description: None,
        };
        assert!(ensure_admin_token(&store, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_or_unknown_scopes() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("m.db"), None).await.unwrap();

        for scopes in [vec![], vec!["node:root".to_string()]] {
            let config = AdminConfig {
                token_scopes: Some(scopes),
                ..admin_config("scoped")
            };
            assert!(ensure_admin_token(&store, &config).await.is_err());
        }
        assert!(store.list_tokens().await.unwrap().is_empty());
    }
}
