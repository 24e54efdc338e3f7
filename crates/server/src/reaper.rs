//! Background expiry reaper.
//!
//! Each pass deletes nodes whose expiration has passed, expires overdue
//! archive jobs and preauth tokens, and purges finished ones after the
//! retention window.

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;
use stash_metadata::repos::ExpirySweep;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Expired nodes fetched per batch.
const NODE_BATCH_SIZE: u32 = 100;

/// Counts from one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub nodes_deleted: u64,
    pub node_failures: u64,
    pub sweep: ExpirySweep,
}

/// Run one reaper pass at `now`.
pub async fn run_pass(state: &AppState, now: OffsetDateTime) -> ApiResult<ReapReport> {
    let mut report = ReapReport::default();

    loop {
        let batch = state
            .metadata
            .list_expired_nodes(now, NODE_BATCH_SIZE)
            .await?;
        let fetched = batch.len();
        let mut deleted = 0u64;
        for row in batch {
            let node_id = row.node_id;
            let result = match row.into_node() {
                Ok(node) => state.remove_node(&node).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    report.node_failures += 1;
                    tracing::warn!(node_id = %node_id, error = %e, "Failed to reap expired node");
                }
            }
        }
        report.nodes_deleted += deleted;
        // Stop on a short batch, or when nothing in a full batch could be removed.
        if fetched < NODE_BATCH_SIZE as usize || deleted == 0 {
            break;
        }
    }
    metrics::NODES_REAPED.inc_by(report.nodes_deleted);

    let purge_before = now - state.config.reaper.retention();
    report.sweep = state.metadata.sweep_archives(now, purge_before).await?;

    Ok(report)
}

/// Spawn the periodic reaper task.
pub fn spawn_reaper(state: AppState) -> JoinHandle<()> {
    let interval = state.config.reaper.interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_pass(&state, OffsetDateTime::now_utc()).await {
                Ok(report) => {
                    let sweep = report.sweep;
                    if report.nodes_deleted > 0
                        || report.node_failures > 0
                        || sweep != ExpirySweep::default()
                    {
                        tracing::info!(
                            nodes_deleted = report.nodes_deleted,
                            node_failures = report.node_failures,
                            jobs_expired = sweep.jobs_expired,
                            tokens_expired = sweep.tokens_expired,
                            jobs_purged = sweep.jobs_purged,
                            tokens_purged = sweep.tokens_purged,
                            "Reaper pass finished"
                        );
                    } else {
                        tracing::debug!("Reaper pass found nothing to do");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reaper pass failed");
                }
            }
        }
    })
}

/// Log how a background task ended. A panic is reported as an error.
pub fn watch_task(name: &'static str, handle: JoinHandle<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match handle.await {
            Ok(()) => tracing::warn!(task = name, "Background task exited"),
            Err(e) if e.is_panic() => {
                tracing::error!(task = name, error = %e, "Background task panicked");
            }
            Err(e) => tracing::debug!(task = name, error = %e, "Background task cancelled"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use stash_core::config::AppConfig;
    use stash_core::{Checksum, FileChecksums, FileInfo, Node, NodeId};
    use stash_metadata::models::NodeRow;
    use stash_metadata::{MetadataStore, SqliteStore};
    use stash_storage::{FilesystemBackend, ObjectStore};
    use std::sync::Arc;
    use tempfile::tempdir;
    use time::Duration;

    async fn build_state() -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("blobs")).await.unwrap());
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );
        (temp, AppState::new(AppConfig::for_testing(), storage, metadata))
    }

    async fn insert_node(state: &AppState, expiration: Option<OffsetDateTime>) -> Node {
        let now = OffsetDateTime::now_utc();
        let node = Node {
            id: NodeId::new(),
            file: FileInfo {
                name: "x.txt".to_string(),
                size: 1,
                checksum: FileChecksums {
                    md5: Some(Checksum::compute(b"x")),
                },
            },
            attributes: Default::default(),
            owner: None,
            created_on: now,
            last_modified: now,
            expiration,
        };
        state
            .storage
            .put(&node.id.blob_key(), Bytes::from_static(b"x"))
            .await
            .unwrap();
        state
            .metadata
            .create_node(&NodeRow::from_node(&node).unwrap(), &[])
            .await
            .unwrap();
        node
    }

    #[tokio::test]
    async fn test_pass_removes_only_expired_nodes() {
        let (_temp, state) = build_state().await;
        let now = OffsetDateTime::now_utc();
        let expired = insert_node(&state, Some(now - Duration::minutes(1))).await;
        let pending = insert_node(&state, Some(now + Duration::hours(1))).await;
        let forever = insert_node(&state, None).await;

        let report = run_pass(&state, now).await.unwrap();
        assert_eq!(report.nodes_deleted, 1);
        assert_eq!(report.node_failures, 0);

        assert!(state.load_node(expired.id).await.is_err());
        assert!(!state.storage.exists(&expired.id.blob_key()).await.unwrap());
        assert!(state.load_node(pending.id).await.is_ok());
        assert!(state.load_node(forever.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_pass_drains_more_than_one_batch() {
        let (_temp, state) = build_state().await;
        let now = OffsetDateTime::now_utc();
        for _ in 0..(NODE_BATCH_SIZE + 5) {
            insert_node(&state, Some(now - Duration::seconds(5))).await;
        }

        let report = run_pass(&state, now).await.unwrap();
        assert_eq!(report.nodes_deleted, u64::from(NODE_BATCH_SIZE) + 5);
    }

    #[tokio::test]
    async fn test_watch_task_reports_panic() {
        let handle = tokio::spawn(async { panic!("boom") });
        watch_task("test", handle).await.unwrap();
    }
}
