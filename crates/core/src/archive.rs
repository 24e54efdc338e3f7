//! Archive jobs and preauthorized download tokens.

use crate::node::{ArchiveFormat, Compression, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an archive job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Archive job lifecycle: `pending -> ready -> consumed`, or `expired` once
/// the job outlives its TTL unconsumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Ready,
    Consumed,
    Expired,
}

impl JobState {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "consumed" => Ok(Self::Consumed),
            "expired" => Ok(Self::Expired),
            other => Err(crate::Error::Serialization(format!(
                "unknown job state: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frozen selection of nodes to bundle into one archive stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveJob {
    pub id: JobId,
    /// Node ids in archive order. Fixed at creation.
    pub node_ids: Vec<NodeId>,
    pub format: ArchiveFormat,
    /// Token id of the requester, absent for anonymous callers.
    pub requester: Option<String>,
    pub state: JobState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl ArchiveJob {
    /// Create a pending job. Repeated ids are dropped, keeping the first occurrence.
    pub fn new(
        node_ids: impl IntoIterator<Item = NodeId>,
        format: ArchiveFormat,
        requester: Option<String>,
        ttl: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: JobId::new(),
            node_ids: dedup_preserving_order(node_ids),
            format,
            requester,
            state: JobState::Pending,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

fn dedup_preserving_order(ids: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// What a preauth token grants access to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreauthResource {
    /// A multi-node archive job.
    Archive(JobId),
    /// A single node's content, optionally compressed.
    Node {
        node_id: NodeId,
        compression: Compression,
    },
}

/// Why a preauth token could not be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreauthRejection {
    NotFound,
    Expired,
    Consumed,
}

impl fmt::Display for PreauthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "preauth token not found",
            Self::Expired => "preauth token expired",
            Self::Consumed => "preauth token already used",
        })
    }
}
