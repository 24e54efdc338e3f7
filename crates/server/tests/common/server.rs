//! Server test utilities.

use crate::common::fixtures::MultipartForm;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use stash_core::config::{AdminConfig, AppConfig, MetadataConfig, StorageConfig};
use stash_metadata::models::TokenRow;
use stash_metadata::{MetadataStore, SqliteStore};
use stash_server::auth::hash_token;
use stash_server::{AppState, create_router};
use stash_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Secret of the admin token every test server is bootstrapped with.
#[allow(dead_code)]
pub const ADMIN_SECRET: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// A fully buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        stash_server::metrics::register_metrics();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem {
                path: storage_path,
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                busy_timeout_secs: None,
            },
            admin: AdminConfig {
                token_hash: hash_token(ADMIN_SECRET),
                token_scopes: None,
                token_description: Some("Test admin token".to_string()),
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        stash_server::bootstrap::ensure_admin_token(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin token");

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Insert a token with the given scopes and return its secret.
    pub async fn create_token(&self, scopes: &[&str]) -> String {
        let secret = format!("test-token-{}", Uuid::new_v4());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            token_hash: hash_token(&secret),
            scopes: serde_json::to_string(scopes).unwrap(),
            expires_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
            description: Some("Test Token".to_string()),
        };
        self.metadata()
            .create_token(&token)
            .await
            .expect("Failed to create token");
        secret
    }

    /// Send a request and buffer the response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a bodyless request.
    pub async fn call(&self, method: &str, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("OAuth {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Send a bodyless request and decode the JSON envelope.
    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let response = self.call(method, uri, token).await;
        (response.status, response.json())
    }

    /// Send a JSON body.
    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        body: &Value,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("OAuth {token}"));
        }
        let response = self
            .send(builder.body(Body::from(serde_json::to_vec(body).unwrap())).unwrap())
            .await;
        (response.status, response.json())
    }

    /// Send a multipart form.
    pub async fn multipart(
        &self,
        method: &str,
        uri: &str,
        form: MultipartForm,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", form.content_type());
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("OAuth {token}"));
        }
        let response = self
            .send(builder.body(Body::from(form.into_body())).unwrap())
            .await;
        (response.status, response.json())
    }

    /// Create a node as `token` and return its JSON record.
    pub async fn create_node(&self, form: MultipartForm, token: &str) -> Value {
        let (status, body) = self.multipart("POST", "/node", form, Some(token)).await;
        assert_eq!(status, StatusCode::OK, "node creation failed: {body}");
        body["data"].clone()
    }

    /// Number of blobs currently stored.
    pub fn blob_count(&self) -> usize {
        let nodes_dir = self._temp_dir.path().join("storage").join("nodes");
        let Ok(entries) = std::fs::read_dir(nodes_dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join("data").is_file())
            .count()
    }
}

/// Path and query of a preauth URL.
#[allow(dead_code)]
pub fn preauth_path(url: &str) -> String {
    let start = url.find("/preauth/").expect("not a preauth URL");
    url[start..].to_string()
}
