//! API tokens, their scopes, and what a token may do to a node.
//!
//! A token's id doubles as the owner recorded on the nodes it creates, so
//! ownership checks compare a node's `owner` against [`Token::owner_id`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidToken(format!("invalid token ID: {e}")))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node access levels. Each level includes the ones below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    /// Query nodes, download content, request archives.
    #[serde(rename = "node:read")]
    NodeRead,
    /// Create nodes and change or delete the caller's own nodes.
    #[serde(rename = "node:write")]
    NodeWrite,
    /// Change or delete any node, see every node, manage tokens.
    #[serde(rename = "node:admin")]
    NodeAdmin,
}

impl TokenScope {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "node:read" => Ok(Self::NodeRead),
            "node:write" => Ok(Self::NodeWrite),
            "node:admin" => Ok(Self::NodeAdmin),
            _ => Err(crate::Error::InvalidToken(format!("unknown scope: {s}"))),
        }
    }

    /// Parse the scope list of a token being issued. The list must be
    /// non-empty and every entry known.
    pub fn parse_grant<S: AsRef<str>>(scopes: &[S]) -> crate::Result<HashSet<Self>> {
        if scopes.is_empty() {
            return Err(crate::Error::InvalidToken(
                "at least one scope is required".to_string(),
            ));
        }
        scopes.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeRead => "node:read",
            Self::NodeWrite => "node:write",
            Self::NodeAdmin => "node:admin",
        }
    }

    /// Whether holding `self` grants `other`.
    pub fn implies(&self, other: &Self) -> bool {
        self >= other
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a token can be used at a given moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
}

/// A stored token, resolved from its secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub scopes: HashSet<TokenScope>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub description: Option<String>,
}

impl Token {
    /// Revocation wins over expiry.
    pub fn status_at(&self, now: OffsetDateTime) -> TokenStatus {
        if self.revoked_at.is_some() {
            TokenStatus::Revoked
        } else if self.expires_at.is_some_and(|at| now > at) {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status_at(OffsetDateTime::now_utc()) == TokenStatus::Active
    }

    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.scopes.iter().any(|s| s.implies(&scope))
    }

    pub fn is_admin(&self) -> bool {
        self.is_valid() && self.has_scope(TokenScope::NodeAdmin)
    }

    /// Owner value recorded on nodes this token creates.
    pub fn owner_id(&self) -> String {
        self.id.to_string()
    }

    pub fn owns(&self, owner: &str) -> bool {
        self.owner_id() == owner
    }

    /// Whether this token may replace attributes of, or delete, a node with
    /// the given owner. Unowned nodes only need write access.
    pub fn may_modify(&self, owner: Option<&str>) -> bool {
        if !self.has_scope(TokenScope::NodeWrite) {
            return false;
        }
        match owner {
            None => true,
            Some(owner) => self.is_admin() || self.owns(owner),
        }
    }
}

/// Request to create a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTokenRequest {
    pub scopes: Vec<String>,
    /// Lifetime in seconds; tokens without one never expire.
    pub expires_in: Option<u64>,
    pub description: Option<String>,
}

/// Response from creating a token. The secret is only ever returned here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    pub token_id: String,
    pub token_secret: String,
    pub expires_at: Option<String>,
}
