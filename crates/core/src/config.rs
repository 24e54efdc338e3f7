//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:7445").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// External base URL used when building preauth URLs.
    /// Falls back to `http://<Host header>` when unset.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Maximum size in bytes of an attribute document.
    #[serde(default = "default_max_attributes_size")]
    pub max_attributes_size: usize,
    /// Page size used when a listing request has no `limit`.
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    /// Upper bound for a requested `limit`.
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:7445".to_string()
}

fn default_max_attributes_size() -> usize {
    1024 * 1024
}

fn default_limit() -> u64 {
    25
}

fn default_max_limit() -> u64 {
    1000
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_url: None,
            max_attributes_size: default_max_attributes_size(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_limit == 0 || self.max_limit == 0 {
            return Err("server.default_limit and server.max_limit must be > 0".to_string());
        }
        if self.default_limit > self.max_limit {
            return Err(format!(
                "server.default_limit {} exceeds server.max_limit {}",
                self.default_limit, self.max_limit
            ));
        }
        Ok(())
    }
}

/// Admin token configuration.
///
/// The admin token is required for server operation. If the token hash changes
/// between restarts, the previous admin token is automatically revoked and a new
/// one is created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Scopes for the admin token (default: ["node:admin"]).
    pub token_scopes: Option<Vec<String>>,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            token_scopes: None,
            token_description: Some("Test admin token".to_string()),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds a statement waits for a locked database before failing.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_busy_timeout_secs() -> Option<u64> {
    Some(5)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

/// Which nodes each caller may see in listings and queries.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Every caller sees every node.
    #[default]
    Open,
    /// Token callers see their own nodes plus unowned ones; anonymous callers
    /// see unowned nodes only.
    Owner,
}

/// Anonymous access and visibility configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Allow unauthenticated reads, queries and archive requests.
    #[serde(default = "default_true")]
    pub anonymous_read: bool,
    /// Allow unauthenticated node creation and attribute updates.
    #[serde(default)]
    pub anonymous_write: bool,
    /// Allow unauthenticated deletes.
    #[serde(default)]
    pub anonymous_delete: bool,
    #[serde(default)]
    pub visibility: Visibility,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_read: true,
            anonymous_write: false,
            anonymous_delete: false,
            visibility: Visibility::default(),
        }
    }
}

/// Preauthorized download configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreauthConfig {
    /// Lifetime of issued preauth tokens and archive jobs.
    #[serde(default = "default_preauth_ttl_secs")]
    pub ttl_secs: u64,
    /// Whether single-node download URLs are single use.
    /// Archive URLs are always single use.
    #[serde(default = "default_true")]
    pub node_single_use: bool,
}

fn default_preauth_ttl_secs() -> u64 {
    3600
}

impl Default for PreauthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_preauth_ttl_secs(),
            node_single_use: true,
        }
    }
}

impl PreauthConfig {
    /// Get the token TTL as a Duration.
    pub fn ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
    }
}

/// Background expiry reaper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between reaper passes.
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// How long consumed or expired jobs and tokens are kept before deletion.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_retention_secs() -> u64 {
    86400
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reaper_interval_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        // tokio::time::interval panics on a zero period
        if self.enabled && self.interval_secs == 0 {
            return Err("reaper.interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub preauth: PreauthConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a dummy admin token and no background reaper.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            auth: AuthConfig::default(),
            preauth: PreauthConfig::default(),
            reaper: ReaperConfig {
                enabled: false,
                ..ReaperConfig::default()
            },
        }
    }

    /// Validate cross-section invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.reaper.validate()?;
        if self.preauth.ttl_secs == 0 {
            return Err("preauth.ttl_secs must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_defaults() {
        let config = AuthConfig::default();
        assert!(config.anonymous_read);
        assert!(!config.anonymous_write);
        assert!(!config.anonymous_delete);
        assert_eq!(config.visibility, Visibility::Open);
    }

    #[test]
    fn test_auth_config_deserialize_partial() {
        let json = r#"{"anonymous_write": true, "visibility": "owner"}"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert!(config.anonymous_read, "anonymous_read should default to true");
        assert!(config.anonymous_write);
        assert_eq!(config.visibility, Visibility::Owner);
    }

    #[test]
    fn test_server_config_validate_limits() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.default_limit = 5000;
        assert!(config.validate().is_err());

        config.default_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reaper_zero_interval_rejected_only_when_enabled() {
        let mut config = ReaperConfig {
            interval_secs: 0,
            ..ReaperConfig::default()
        };
        assert!(config.validate().is_err());
        config.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_preauth_ttl_saturates() {
        let config = PreauthConfig {
            ttl_secs: u64::MAX,
            node_single_use: true,
        };
        assert_eq!(config.ttl(), Duration::seconds(i64::MAX));
    }

    #[test]
    fn test_storage_config_tagged() {
        let json = r#"{"type":"filesystem","path":"/tmp/stash"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        let StorageConfig::Filesystem { path } = config;
        assert_eq!(path, PathBuf::from("/tmp/stash"));
    }
}
