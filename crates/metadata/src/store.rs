//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ArchiveRepo, BootstrapRepo, NodeRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: NodeRepo + ArchiveRepo + TokenRepo + BootstrapRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    ///
    /// `busy_timeout_secs` bounds how long a statement waits on a database
    /// locked by another connection (default 5).
    pub async fn new(
        path: impl AsRef<Path>,
        busy_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let busy_timeout_secs = busy_timeout_secs.unwrap_or(DEFAULT_BUSY_TIMEOUT_SECS);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers, so every transaction below runs
            // without interleaving.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            busy_timeout_secs,
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Timestamps are stored as RFC 3339 text. Comparisons go through julianday()
// because the text form trims trailing subsecond zeros and does not sort.
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::ExpirySweep;
    use sqlx::QueryBuilder;
    use stash_core::{Filter, NodeField, NodeQuery, NodeScope, PreauthRejection};
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn insert_index(
        tx: &mut sqlx::SqliteConnection,
        node_id: Uuid,
        index: &[(String, String)],
    ) -> MetadataResult<()> {
        for (path, value) in index {
            sqlx::query("INSERT INTO node_attributes (node_id, path, value) VALUES (?, ?, ?)")
                .bind(node_id)
                .bind(path)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        Ok(())
    }

    fn push_query_conditions<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &'a NodeQuery) {
        for filter in &query.filters {
            match filter {
                Filter::Attribute { path, value } => {
                    qb.push(
                        " AND EXISTS (SELECT 1 FROM node_attributes a \
                         WHERE a.node_id = n.node_id AND a.path = ",
                    );
                    qb.push_bind(path.as_str());
                    qb.push(" AND a.value = ");
                    qb.push_bind(value.as_str());
                    qb.push(")");
                }
                Filter::Field { field, value } => push_field_condition(qb, *field, value),
            }
        }

        match &query.scope {
            NodeScope::All => {}
            NodeScope::VisibleTo(Some(owner)) => {
                qb.push(" AND (n.owner IS NULL OR n.owner = ");
                qb.push_bind(owner.as_str());
                qb.push(")");
            }
            NodeScope::VisibleTo(None) => {
                qb.push(" AND n.owner IS NULL");
            }
        }
    }

    fn push_field_condition<'a>(qb: &mut QueryBuilder<'a, Sqlite>, field: NodeField, value: &'a str) {
        match field {
            NodeField::Id => match Uuid::parse_str(value.trim()) {
                Ok(id) => {
                    qb.push(" AND n.node_id = ");
                    qb.push_bind(id);
                }
                // Not a node id, so nothing can match.
                Err(_) => {
                    qb.push(" AND 0");
                }
            },
            NodeField::FileName => {
                qb.push(" AND n.file_name = ");
                qb.push_bind(value);
            }
            NodeField::FileSize => match value.trim().parse::<i64>() {
                Ok(size) => {
                    qb.push(" AND n.file_size = ");
                    qb.push_bind(size);
                }
                Err(_) => {
                    qb.push(" AND 0");
                }
            },
            NodeField::FileMd5 => {
                qb.push(" AND n.file_md5 = ");
                qb.push_bind(value.to_ascii_lowercase());
            }
            NodeField::Owner => {
                qb.push(" AND n.owner = ");
                qb.push_bind(value);
            }
        }
    }

    #[async_trait]
    impl NodeRepo for SqliteStore {
        async fn create_node(
            &self,
            node: &NodeRow,
            index: &[(String, String)],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                INSERT INTO nodes (
                    node_id, file_name, file_size, file_md5, attributes,
                    owner, created_on, last_modified, expiration
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(node.node_id)
            .bind(&node.file_name)
            .bind(node.file_size)
            .bind(&node.file_md5)
            .bind(&node.attributes)
            .bind(&node.owner)
            .bind(node.created_on)
            .bind(node.last_modified)
            .bind(node.expiration)
            .execute(&mut *tx)
            .await;

            if let Err(sqlx::Error::Database(db)) = &result
                && db.is_unique_violation()
            {
                return Err(MetadataError::AlreadyExists(format!(
                    "node {} already exists",
                    node.node_id
                )));
            }
            result?;

            insert_index(&mut tx, node.node_id, index).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_node(&self, node_id: Uuid) -> MetadataResult<Option<NodeRow>> {
            let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE node_id = ?")
                .bind(node_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_node(
            &self,
            node_id: Uuid,
            update: &NodeUpdate,
            modified_at: OffsetDateTime,
        ) -> MetadataResult<NodeRow> {
            let mut tx = self.pool.begin().await?;

            let touched = sqlx::query("UPDATE nodes SET last_modified = ? WHERE node_id = ?")
                .bind(modified_at)
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("node {node_id}")));
            }

            if let Some(doc) = &update.attributes {
                sqlx::query("UPDATE nodes SET attributes = ? WHERE node_id = ?")
                    .bind(&doc.json)
                    .bind(node_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM node_attributes WHERE node_id = ?")
                    .bind(node_id)
                    .execute(&mut *tx)
                    .await?;
                insert_index(&mut tx, node_id, &doc.index).await?;
            }

            if let Some(expiration) = update.expiration {
                sqlx::query("UPDATE nodes SET expiration = ? WHERE node_id = ?")
                    .bind(expiration)
                    .bind(node_id)
                    .execute(&mut *tx)
                    .await?;
            }

            let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE node_id = ?")
                .bind(node_id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn delete_node(&self, node_id: Uuid) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM node_attributes WHERE node_id = ?")
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM nodes WHERE node_id = ?")
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("node {node_id}")));
            }
            tx.commit().await?;
            Ok(())
        }

        async fn query_nodes(&self, query: &NodeQuery) -> MetadataResult<(Vec<NodeRow>, u64)> {
            // Count and page run in one transaction so total_count matches the page.
            let mut tx = self.pool.begin().await?;

            let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM nodes n WHERE 1 = 1");
            push_query_conditions(&mut count, query);
            let total: i64 = count.build_query_scalar::<i64>().fetch_one(&mut *tx).await?;

            let mut select = QueryBuilder::<Sqlite>::new("SELECT n.* FROM nodes n WHERE 1 = 1");
            push_query_conditions(&mut select, query);
            // rowid follows insertion order, i.e. creation order
            select.push(" ORDER BY n.rowid LIMIT ");
            select.push_bind(query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)));
            select.push(" OFFSET ");
            select.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
            let rows = select
                .build_query_as::<NodeRow>()
                .fetch_all(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok((rows, u64::try_from(total).unwrap_or(0)))
        }

        async fn list_expired_nodes(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<NodeRow>> {
            let rows = sqlx::query_as::<_, NodeRow>(
                r#"
                SELECT * FROM nodes
                WHERE expiration IS NOT NULL AND julianday(expiration) <= julianday(?)
                ORDER BY julianday(expiration)
                LIMIT ?
                "#,
            )
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ArchiveRepo for SqliteStore {
        async fn create_archive_job(
            &self,
            job: &ArchiveJobRow,
            node_ids: &[Uuid],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO archive_jobs (
                    job_id, format, requester, state, created_at, expires_at, finished_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.job_id)
            .bind(&job.format)
            .bind(&job.requester)
            .bind(&job.state)
            .bind(job.created_at)
            .bind(job.expires_at)
            .bind(job.finished_at)
            .execute(&mut *tx)
            .await?;

            for (position, node_id) in node_ids.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO archive_job_nodes (job_id, position, node_id) VALUES (?, ?, ?)",
                )
                .bind(job.job_id)
                .bind(position as i64)
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_archive_job(&self, job_id: Uuid) -> MetadataResult<Option<ArchiveJobRow>> {
            let row =
                sqlx::query_as::<_, ArchiveJobRow>("SELECT * FROM archive_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_archive_job_nodes(&self, job_id: Uuid) -> MetadataResult<Vec<Uuid>> {
            let ids = sqlx::query_scalar::<_, Uuid>(
                "SELECT node_id FROM archive_job_nodes WHERE job_id = ? ORDER BY position",
            )
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }

        async fn mark_archive_job_ready(&self, job_id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE archive_jobs SET state = 'ready' WHERE job_id = ? AND state = 'pending'",
            )
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn create_preauth_token(&self, token: &PreauthTokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO preauth_tokens (
                    token, job_id, node_id, compression, single_use,
                    state, created_at, expires_at, consumed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.token)
            .bind(token.job_id)
            .bind(token.node_id)
            .bind(&token.compression)
            .bind(token.single_use)
            .bind(&token.state)
            .bind(token.created_at)
            .bind(token.expires_at)
            .bind(token.consumed_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_preauth_token(&self, token: &str) -> MetadataResult<Option<PreauthTokenRow>> {
            let row =
                sqlx::query_as::<_, PreauthTokenRow>("SELECT * FROM preauth_tokens WHERE token = ?")
                    .bind(token)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn consume_preauth_token(
            &self,
            token: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<PreauthTokenRow> {
            let mut tx = self.pool.begin().await?;

            let claimed = sqlx::query(
                r#"
                UPDATE preauth_tokens SET state = 'consumed', consumed_at = ?
                WHERE token = ? AND single_use = 1 AND state = 'active'
                  AND julianday(expires_at) > julianday(?)
                "#,
            )
            .bind(now)
            .bind(token)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            let Some(row) =
                sqlx::query_as::<_, PreauthTokenRow>("SELECT * FROM preauth_tokens WHERE token = ?")
                    .bind(token)
                    .fetch_optional(&mut *tx)
                    .await?
            else {
                return Err(MetadataError::Preauth(PreauthRejection::NotFound));
            };

            if claimed {
                if let Some(job_id) = row.job_id {
                    let job = sqlx::query(
                        r#"
                        UPDATE archive_jobs SET state = 'consumed', finished_at = ?
                        WHERE job_id = ? AND state IN ('pending', 'ready')
                        "#,
                    )
                    .bind(now)
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                    if job.rows_affected() == 0 {
                        // Dropping the transaction rolls the token claim back.
                        return Err(MetadataError::Preauth(PreauthRejection::Expired));
                    }
                }
                tx.commit().await?;
                return Ok(row);
            }

            if row.state == "consumed" {
                return Err(MetadataError::Preauth(PreauthRejection::Consumed));
            }
            if row.state == "expired" || row.expires_at <= now {
                return Err(MetadataError::Preauth(PreauthRejection::Expired));
            }
            // Reusable token that is still valid.
            Ok(row)
        }

        async fn sweep_archives(
            &self,
            now: OffsetDateTime,
            purge_before: OffsetDateTime,
        ) -> MetadataResult<ExpirySweep> {
            let mut tx = self.pool.begin().await?;

            let jobs_expired = sqlx::query(
                r#"
                UPDATE archive_jobs SET state = 'expired', finished_at = ?
                WHERE state IN ('pending', 'ready') AND julianday(expires_at) <= julianday(?)
                "#,
            )
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let tokens_expired = sqlx::query(
                r#"
                UPDATE preauth_tokens SET state = 'expired'
                WHERE state = 'active' AND julianday(expires_at) <= julianday(?)
                "#,
            )
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let tokens_purged = sqlx::query(
                r#"
                DELETE FROM preauth_tokens
                WHERE state != 'active'
                  AND julianday(COALESCE(consumed_at, expires_at)) < julianday(?)
                "#,
            )
            .bind(purge_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let jobs_purged = sqlx::query(
                r#"
                DELETE FROM archive_jobs
                WHERE state IN ('consumed', 'expired')
                  AND julianday(COALESCE(finished_at, expires_at)) < julianday(?)
                "#,
            )
            .bind(purge_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;
            Ok(ExpirySweep {
                jobs_expired,
                tokens_expired,
                jobs_purged,
                tokens_purged,
            })
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, token_hash, scopes, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(&token.token_hash)
            .bind(&token.scopes)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE tokens SET revoked_at = COALESCE(revoked_at, ?) WHERE token_id = ?",
            )
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_tokens(&self) -> MetadataResult<Vec<TokenRow>> {
            let rows = sqlx::query_as::<_, TokenRow>(
                "SELECT * FROM tokens ORDER BY julianday(created_at) DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl BootstrapRepo for SqliteStore {
        async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            parse_marker(value.flatten())
        }

        async fn rotate_bootstrap_token(&self, token: &TokenRow) -> MetadataResult<Option<Uuid>> {
            let mut tx = self.pool.begin().await?;

            let previous: Option<Option<String>> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&mut *tx)
                    .await?;
            let previous = parse_marker(previous.flatten())?;

            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, token_hash, scopes, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(&token.token_hash)
            .bind(&token.scopes)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&mut *tx)
            .await?;

            if let Some(previous_id) = previous {
                sqlx::query(
                    "UPDATE tokens SET revoked_at = ? WHERE token_id = ? AND revoked_at IS NULL",
                )
                .bind(token.created_at)
                .bind(previous_id)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (id, bootstrap_token_id)
                VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE
                SET bootstrap_token_id = excluded.bootstrap_token_id
                "#,
            )
            .bind(token.token_id.to_string())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(previous)
        }
    }

    fn parse_marker(value: Option<String>) -> MetadataResult<Option<Uuid>> {
        value
            .filter(|id| !id.is_empty())
            .map(|id| {
                Uuid::parse_str(&id).map_err(|e| {
                    MetadataError::Internal(format!("invalid bootstrap_token_id uuid '{id}': {e}"))
                })
            })
            .transpose()
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id BLOB PRIMARY KEY,
    file_name TEXT NOT NULL DEFAULT '',
    file_size INTEGER NOT NULL DEFAULT 0,
    file_md5 TEXT,
    attributes TEXT NOT NULL DEFAULT '{}',
    owner TEXT,
    created_on TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    expiration TEXT
);
CREATE INDEX IF NOT EXISTS idx_nodes_owner ON nodes(owner);
CREATE INDEX IF NOT EXISTS idx_nodes_file_name ON nodes(file_name);
CREATE INDEX IF NOT EXISTS idx_nodes_expiration ON nodes(expiration) WHERE expiration IS NOT NULL;

-- Flattened attribute leaves, rewritten with every attribute replacement
CREATE TABLE IF NOT EXISTS node_attributes (
    node_id BLOB NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_node_attributes_lookup ON node_attributes(path, value);
CREATE INDEX IF NOT EXISTS idx_node_attributes_node ON node_attributes(node_id);

CREATE TABLE IF NOT EXISTS archive_jobs (
    job_id BLOB PRIMARY KEY,
    format TEXT NOT NULL CHECK (format IN ('zip', 'tar')),
    requester TEXT,
    state TEXT NOT NULL CHECK (state IN ('pending', 'ready', 'consumed', 'expired')),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_archive_jobs_state ON archive_jobs(state);

-- Member nodes are not foreign keys: a job keeps naming a node deleted after creation
CREATE TABLE IF NOT EXISTS archive_job_nodes (
    job_id BLOB NOT NULL REFERENCES archive_jobs(job_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    node_id BLOB NOT NULL,
    PRIMARY KEY (job_id, position)
);

CREATE TABLE IF NOT EXISTS preauth_tokens (
    token TEXT PRIMARY KEY,
    job_id BLOB REFERENCES archive_jobs(job_id) ON DELETE CASCADE,
    node_id BLOB,
    compression TEXT,
    single_use INTEGER NOT NULL DEFAULT 1,
    state TEXT NOT NULL CHECK (state IN ('active', 'consumed', 'expired')),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    consumed_at TEXT,
    CHECK ((job_id IS NULL) != (node_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_preauth_tokens_state ON preauth_tokens(state);

CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    token_hash TEXT NOT NULL UNIQUE,
    scopes TEXT NOT NULL,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_hash ON tokens(token_hash);

-- Bootstrap marker
CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
INSERT OR IGNORE INTO bootstrap_state (id, bootstrap_token_id) VALUES (1, NULL);
"#;
