//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use stash_core::config::AuthConfig;
use stash_core::token::{Token, TokenId, TokenScope, TokenStatus};
use stash_metadata::models::TokenRow;
use std::collections::HashSet;
use std::convert::Infallible;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Authorization schemes accepted for API tokens. Matching is case-insensitive.
const AUTH_SCHEMES: &[&str] = &["oauth", "bearer"];

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is making a request.
#[derive(Clone, Debug, Default)]
pub enum Caller {
    /// No credential was supplied.
    #[default]
    Anonymous,
    /// A valid API token.
    Token(Token),
}

impl Caller {
    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Anonymous => None,
            Self::Token(token) => Some(token),
        }
    }

    /// Identity recorded as node owner or archive requester.
    pub fn identity(&self) -> Option<String> {
        self.token().map(Token::owner_id)
    }

    pub fn is_admin(&self) -> bool {
        self.token().is_some_and(Token::is_admin)
    }

    /// Require `scope` from a token caller, or `anonymous_allowed` for an
    /// anonymous one.
    pub fn require(&self, scope: TokenScope, anonymous_allowed: bool) -> ApiResult<()> {
        match self {
            Self::Token(token) if token.has_scope(scope) => Ok(()),
            Self::Token(_) => Err(ApiError::Forbidden(format!(
                "missing required scope: {scope}"
            ))),
            Self::Anonymous if anonymous_allowed => Ok(()),
            Self::Anonymous => Err(ApiError::Unauthorized(
                "authentication required".to_string(),
            )),
        }
    }

    pub fn require_read(&self, config: &AuthConfig) -> ApiResult<()> {
        self.require(TokenScope::NodeRead, config.anonymous_read)
    }

    pub fn require_write(&self, config: &AuthConfig) -> ApiResult<()> {
        self.require(TokenScope::NodeWrite, config.anonymous_write)
    }

    /// Check that this caller may change or remove a node owned by `owner`.
    ///
    /// Admins may modify any node and everyone else only their own or
    /// unowned nodes.
    pub fn require_modify(&self, owner: Option<&str>, anonymous_allowed: bool) -> ApiResult<()> {
        self.require(TokenScope::NodeWrite, anonymous_allowed)?;
        match self {
            Self::Token(token) if token.may_modify(owner) => Ok(()),
            Self::Token(_) => Err(ApiError::Forbidden(
                "node is owned by another token".to_string(),
            )),
            Self::Anonymous if owner.is_none() => Ok(()),
            Self::Anonymous => Err(ApiError::Unauthorized(
                "node is owned; authentication required".to_string(),
            )),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Caller>().cloned().unwrap_or_default())
    }
}

/// Outcome of reading the Authorization header.
#[derive(Debug, PartialEq, Eq)]
enum Credential<'a> {
    Absent,
    Token(&'a str),
    Malformed,
}

/// Extract the API token from the Authorization header.
/// Accepts `OAuth <token>` and `Bearer <token>`.
fn extract_credential(req: &Request) -> Credential<'_> {
    let Some(value) = req.headers().get(AUTHORIZATION) else {
        return Credential::Absent;
    };
    let Ok(value) = value.to_str() else {
        return Credential::Malformed;
    };
    let value = value.trim();
    if value.is_empty() {
        return Credential::Absent;
    }
    let Some((scheme, token)) = value.split_once(' ') else {
        return Credential::Malformed;
    };
    let token = token.trim();
    if token.is_empty() || !AUTH_SCHEMES.iter().any(|s| scheme.eq_ignore_ascii_case(s)) {
        return Credential::Malformed;
    }
    Credential::Token(token)
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Generate a random secret using cryptographically secure RNG.
///
/// Used for API token secrets and preauth tokens.
pub fn generate_secret() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage lookup.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Build a [`Token`] from its stored row. Unknown scopes are dropped.
pub fn token_from_row(row: &TokenRow) -> ApiResult<Token> {
    let scopes: Vec<String> = serde_json::from_str(&row.scopes)
        .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;

    let scopes: HashSet<TokenScope> = scopes
        .iter()
        .filter_map(|s| match TokenScope::parse(s) {
            Ok(scope) => Some(scope),
            Err(_) => {
                tracing::warn!(
                    token_id = %row.token_id,
                    invalid_scope = %s,
                    "Token contains invalid scope, ignoring"
                );
                None
            }
        })
        .collect();

    Ok(Token {
        id: TokenId::from_uuid(row.token_id),
        scopes,
        expires_at: row.expires_at,
        revoked_at: row.revoked_at,
        created_at: row.created_at,
        description: row.description.clone(),
    })
}

/// Resolve a presented token secret to a valid token.
async fn authenticate(state: &AppState, secret: &str) -> ApiResult<Token> {
    let row = state
        .metadata
        .get_token_by_hash(&hash_token(secret))
        .await?
        .ok_or_else(|| ApiError::Forbidden("invalid credentials".to_string()))?;

    let token = token_from_row(&row)?;
    match token.status_at(OffsetDateTime::now_utc()) {
        TokenStatus::Active => {}
        TokenStatus::Expired => return Err(ApiError::Forbidden("token expired".to_string())),
        TokenStatus::Revoked => return Err(ApiError::Forbidden("token revoked".to_string())),
    }

    // Update last used time (fire and forget)
    let metadata = state.metadata.clone();
    let token_id = row.token_id;
    tokio::spawn(async move {
        if let Err(e) = metadata
            .touch_token(token_id, OffsetDateTime::now_utc())
            .await
        {
            tracing::debug!(token_id = %token_id, error = %e, "Failed to touch token");
        }
    });

    Ok(token)
}

/// Authentication middleware that resolves the [`Caller`] and sets up trace context.
///
/// A missing credential resolves to [`Caller::Anonymous`]; handlers decide
/// whether that is enough. A present but unusable credential is rejected here.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    req.extensions_mut().insert(trace_id);

    async move {
        let caller = match extract_credential(&req) {
            Credential::Absent => Caller::Anonymous,
            Credential::Token(secret) => Caller::Token(authenticate(&state, secret).await?),
            Credential::Malformed => {
                return Err(ApiError::Forbidden(
                    "malformed Authorization header".to_string(),
                ));
            }
        };
        if let Caller::Token(token) = &caller {
            tracing::debug!(token_id = %token.id, "Authenticated request");
        }
        req.extensions_mut().insert(caller);
        Ok(next.run(req).await)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        Request::builder()
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    fn token_with(scopes: &[TokenScope]) -> Token {
        Token {
            id: TokenId::new(),
            scopes: scopes.iter().copied().collect(),
            expires_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
            description: None,
        }
    }

    #[test]
    fn test_extract_credential_schemes() {
        assert_eq!(
            extract_credential(&request_with_auth("OAuth abc")),
            Credential::Token("abc")
        );
        assert_eq!(
            extract_credential(&request_with_auth("oauth abc")),
            Credential::Token("abc")
        );
        assert_eq!(
            extract_credential(&request_with_auth("Bearer xyz")),
            Credential::Token("xyz")
        );
        assert_eq!(
            extract_credential(&request_with_auth("Basic dXNlcg==")),
            Credential::Malformed
        );
        assert_eq!(
            extract_credential(&request_with_auth("OAuth")),
            Credential::Malformed
        );
        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_credential(&bare), Credential::Absent);
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\n\u{7f}def");
        assert_eq!(id.as_str(), "abcdef");
        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);
        assert!(!TraceId::from_client("\n").as_str().is_empty());
    }

    #[test]
    fn test_hash_token_matches_known_digest() {
        assert_eq!(
            hash_token("test-admin-token"),
            "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
        );
    }

    #[test]
    fn test_require_scope_and_anonymous() {
        let reader = Caller::Token(token_with(&[TokenScope::NodeRead]));
        assert!(reader.require(TokenScope::NodeRead, false).is_ok());
        assert!(matches!(
            reader.require(TokenScope::NodeWrite, true),
            Err(ApiError::Forbidden(_))
        ));

        let anon = Caller::Anonymous;
        assert!(anon.require(TokenScope::NodeRead, true).is_ok());
        assert!(matches!(
            anon.require(TokenScope::NodeWrite, false),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_require_modify_owner_rules() {
        let owner_token = token_with(&[TokenScope::NodeWrite]);
        let owner_id = owner_token.id.to_string();
        let owner = Caller::Token(owner_token);
        let other = Caller::Token(token_with(&[TokenScope::NodeWrite]));
        let admin = Caller::Token(token_with(&[TokenScope::NodeAdmin]));

        assert!(owner.require_modify(Some(&owner_id), false).is_ok());
        assert!(admin.require_modify(Some(&owner_id), false).is_ok());
        assert!(matches!(
            other.require_modify(Some(&owner_id), false),
            Err(ApiError::Forbidden(_))
        ));
        assert!(other.require_modify(None, false).is_ok());
        assert!(matches!(
            Caller::Anonymous.require_modify(Some(&owner_id), true),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(Caller::Anonymous.require_modify(None, true).is_ok());
    }

    #[test]
    fn test_token_from_row_drops_unknown_scopes() {
        let row = TokenRow {
            token_id: Uuid::new_v4(),
            token_hash: hash_token("secret"),
            scopes: r#"["node:read","cache:admin"]"#.to_string(),
            expires_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
            description: None,
        };
        let token = token_from_row(&row).unwrap();
        assert_eq!(token.scopes.len(), 1);
        assert!(token.has_scope(TokenScope::NodeRead));
    }
}
