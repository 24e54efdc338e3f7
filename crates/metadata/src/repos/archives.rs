//! Archive job and preauth token repository.

use crate::error::MetadataResult;
use crate::models::{ArchiveJobRow, PreauthTokenRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Counts from one expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub jobs_expired: u64,
    pub tokens_expired: u64,
    pub jobs_purged: u64,
    pub tokens_purged: u64,
}

/// Repository for archive jobs and preauth tokens.
#[async_trait]
pub trait ArchiveRepo: Send + Sync {
    /// Insert a job and its ordered member nodes.
    async fn create_archive_job(&self, job: &ArchiveJobRow, node_ids: &[Uuid])
    -> MetadataResult<()>;

    /// Get a job by ID.
    async fn get_archive_job(&self, job_id: Uuid) -> MetadataResult<Option<ArchiveJobRow>>;

    /// Member node IDs in archive order.
    async fn get_archive_job_nodes(&self, job_id: Uuid) -> MetadataResult<Vec<Uuid>>;

    /// Move a job from `pending` to `ready`. Returns false if the job was not pending.
    async fn mark_archive_job_ready(&self, job_id: Uuid) -> MetadataResult<bool>;

    /// Insert a preauth token.
    async fn create_preauth_token(&self, token: &PreauthTokenRow) -> MetadataResult<()>;

    /// Get a preauth token without consuming it.
    async fn get_preauth_token(&self, token: &str) -> MetadataResult<Option<PreauthTokenRow>>;

    /// Redeem a preauth token.
    ///
    /// Single-use tokens move `active -> consumed` through a compare-and-set, and
    /// a bound archive job moves to `consumed` in the same transaction; exactly
    /// one of any number of concurrent callers succeeds. Reusable tokens are
    /// only checked for validity. Failures are `MetadataError::Preauth`.
    async fn consume_preauth_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<PreauthTokenRow>;

    /// Mark overdue jobs and tokens expired, then delete finished ones whose
    /// expiry or consumption predates `purge_before`.
    async fn sweep_archives(
        &self,
        now: OffsetDateTime,
        purge_before: OffsetDateTime,
    ) -> MetadataResult<ExpirySweep>;
}
