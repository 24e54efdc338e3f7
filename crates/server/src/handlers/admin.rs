//! Token administration endpoints.

use crate::auth::{Caller, generate_secret, hash_token};
use crate::error::{ApiError, ApiResult};
use crate::response::Reply;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde::Serialize;
use stash_core::token::{CreateTokenRequest, CreateTokenResponse, TokenScope};
use stash_metadata::models::TokenRow;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Token listing entry. Secrets and hashes are never returned.
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub description: Option<String>,
}

fn format_time(t: OffsetDateTime, field: &str) -> ApiResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format {field}: {e}")))
}

impl TokenInfo {
    fn from_row(row: TokenRow) -> ApiResult<Self> {
        let scopes: Vec<String> = serde_json::from_str(&row.scopes)
            .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;
        Ok(Self {
            token_id: row.token_id.to_string(),
            scopes,
            expires_at: row
                .expires_at
                .map(|t| format_time(t, "expires_at"))
                .transpose()?,
            revoked_at: row
                .revoked_at
                .map(|t| format_time(t, "revoked_at"))
                .transpose()?,
            created_at: format_time(row.created_at, "created_at")?,
            last_used_at: row
                .last_used_at
                .map(|t| format_time(t, "last_used_at"))
                .transpose()?,
            description: row.description,
        })
    }
}

/// POST /admin/tokens - Create a new token.
pub async fn create_token(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Reply<CreateTokenResponse>> {
    caller.require(TokenScope::NodeAdmin, false)?;

    let body: CreateTokenRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    TokenScope::parse_grant(&body.scopes).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let token_secret = generate_secret();
    let now = OffsetDateTime::now_utc();
    let expires_at = match body.expires_in {
        Some(secs) => {
            let secs = i64::try_from(secs).map_err(|_| {
                ApiError::BadRequest(format!("expires_in too large: {secs}"))
            })?;
            let expires_at = now
                .checked_add(time::Duration::seconds(secs))
                .ok_or_else(|| ApiError::BadRequest(format!("expires_in too large: {secs}")))?;
            Some(expires_at)
        }
        None => None,
    };

    let scopes_json = serde_json::to_string(&body.scopes)
        .map_err(|e| ApiError::Internal(format!("failed to serialize scopes: {e}")))?;

    let token_row = TokenRow {
        token_id: Uuid::new_v4(),
        token_hash: hash_token(&token_secret),
        scopes: scopes_json,
        expires_at,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: body.description,
    };
    state.metadata.create_token(&token_row).await?;

    tracing::info!(
        token_id = %token_row.token_id,
        scopes = ?body.scopes,
        created_by = ?caller.identity(),
        "Token created"
    );

    Ok(Reply::created(CreateTokenResponse {
        token_id: token_row.token_id.to_string(),
        token_secret,
        expires_at: expires_at
            .map(|t| format_time(t, "expires_at"))
            .transpose()?,
    }))
}

/// GET /admin/tokens - List tokens.
pub async fn list_tokens(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Reply<Vec<TokenInfo>>> {
    caller.require(TokenScope::NodeAdmin, false)?;

    let tokens = state
        .metadata
        .list_tokens()
        .await?
        .into_iter()
        .map(TokenInfo::from_row)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Reply::ok(tokens))
}

/// DELETE /admin/tokens/{token_id} - Revoke a token.
pub async fn revoke_token(
    State(state): State<AppState>,
    caller: Caller,
    Path(token_id): Path<String>,
) -> ApiResult<Reply<()>> {
    caller.require(TokenScope::NodeAdmin, false)?;

    let token_id = Uuid::parse_str(&token_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid token ID: {e}")))?;

    let row = state
        .metadata
        .get_token(token_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("token not found".to_string()))?;
    if row.revoked_at.is_some() {
        return Err(ApiError::Conflict(format!(
            "token {token_id} is already revoked"
        )));
    }

    state
        .metadata
        .revoke_token(token_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(token_id = %token_id, revoked_by = ?caller.identity(), "Token revoked");

    Ok(Reply::empty())
}
