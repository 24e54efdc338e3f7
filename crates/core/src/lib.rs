//! Core domain types and shared logic for the stash node store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Nodes, file info and attribute documents
//! - Content checksums
//! - Attribute queries and index flattening
//! - Archive jobs and preauthorized download tokens
//! - Token scopes and authorization

pub mod archive;
pub mod config;
pub mod error;
pub mod hash;
pub mod node;
pub mod query;
pub mod token;

pub use archive::{ArchiveJob, JobId, JobState, PreauthRejection, PreauthResource};
pub use error::{Error, Result};
pub use hash::{Checksum, Md5Hasher};
pub use node::{
    ArchiveFormat, Attributes, Compression, ContentEncoding, FileChecksums, FileInfo, Node,
    NodeId, parse_attributes, parse_expiration,
};
pub use query::{Filter, NodeField, NodeQuery, NodeScope};
pub use token::{Token, TokenId, TokenScope, TokenStatus};
