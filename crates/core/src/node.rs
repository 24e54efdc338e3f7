//! Node records: a file blob paired with a mutable attribute bag.

use crate::hash::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Arbitrary, ordered attribute metadata attached to a node.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidNodeId(format!("{s}: {e}")))
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Object store key holding this node's file content.
    pub fn blob_key(&self) -> String {
        format!("nodes/{}/data", self.0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checksums computed over the decompressed file content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksums {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<Checksum>,
}

/// File portion of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Stored file name (compression suffix stripped).
    pub name: String,
    /// Size of the decompressed content in bytes.
    pub size: u64,
    /// Content checksums; empty when the node carries no file.
    pub checksum: FileChecksums,
}

impl FileInfo {
    /// Whether this node has file content at all.
    pub fn has_content(&self) -> bool {
        self.checksum.md5.is_some()
    }
}

/// A stored node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub file: FileInfo,
    pub attributes: Attributes,
    /// Token id of the creator, absent for anonymous uploads.
    pub owner: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
}

impl Node {
    /// Name to use for this node's content inside an archive or download.
    pub fn display_name(&self) -> String {
        if self.file.name.is_empty() {
            self.id.to_string()
        } else {
            self.file.name.clone()
        }
    }
}

/// Parse an attribute document. The document must be a JSON object.
pub fn parse_attributes(data: &[u8]) -> crate::Result<Attributes> {
    let value: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| crate::Error::InvalidAttributes(format!("malformed JSON: {e}")))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(crate::Error::InvalidAttributes(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Parse a relative expiration such as `30M`, `12H` or `7D`.
pub fn parse_expiration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    let Some(unit) = s.chars().last() else {
        return Err(crate::Error::InvalidExpiration("empty value".to_string()));
    };
    let digits = &s[..s.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(crate::Error::InvalidExpiration(format!(
            "expected <number><M|H|D>, got {s:?}"
        )));
    }
    let n: i64 = digits
        .parse()
        .map_err(|e| crate::Error::InvalidExpiration(format!("{s:?}: {e}")))?;
    let unit_secs: i64 = match unit {
        'M' => 60,
        'H' => 3600,
        'D' => 86400,
        _ => {
            return Err(crate::Error::InvalidExpiration(format!(
                "unknown unit {unit:?}, expected M, H or D"
            )));
        }
    };
    n.checked_mul(unit_secs)
        .map(Duration::seconds)
        .ok_or_else(|| crate::Error::InvalidExpiration(format!("{s:?} is out of range")))
}

/// How uploaded content is encoded on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Plain,
    Gzip,
    Bzip2,
}

impl ContentEncoding {
    /// Map a multipart field name to a content encoding.
    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            "upload" => Some(Self::Plain),
            "gzip" => Some(Self::Gzip),
            "bzip2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    /// Multipart field name for this encoding.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Plain => "upload",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }

    /// Strip the compression suffix from an uploaded file name.
    pub fn stored_name(&self, uploaded: &str) -> String {
        let suffixes: &[&str] = match self {
            Self::Plain => &[],
            Self::Gzip => &[".gz", ".gzip"],
            Self::Bzip2 => &[".bz2", ".bzip2"],
        };
        suffixes
            .iter()
            .find_map(|suffix| uploaded.strip_suffix(suffix))
            .filter(|stem| !stem.is_empty())
            .unwrap_or(uploaded)
            .to_string()
    }
}

/// Compression container applied to a single-node download.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zip,
}

impl Compression {
    /// Parse from a query parameter value. An empty value means no compression.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "zip" => Ok(Self::Zip),
            other => Err(crate::Error::InvalidCompression(format!(
                "{other:?} (expected gzip or zip)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zip => "zip",
        }
    }

    /// File name suffix added to compressed downloads.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zip => ".zip",
        }
    }
}

/// Multi-node archive container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Tar,
}

impl ArchiveFormat {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "zip" => Ok(Self::Zip),
            "tar" => Ok(Self::Tar),
            other => Err(crate::Error::InvalidArchiveFormat(format!(
                "{other:?} (expected zip or tar)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Tar => "application/x-tar",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes_requires_object() {
        let attrs = parse_attributes(br#"{"project_id":"TESTPROJECT","n":3}"#).unwrap();
        let keys: Vec<_> = attrs.keys().cloned().collect();
        assert_eq!(keys, vec!["project_id", "n"]);

        assert!(parse_attributes(b"[1,2]").is_err());
        assert!(parse_attributes(b"\"x\"").is_err());
        assert!(parse_attributes(b"{not json").is_err());
    }

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration("30M").unwrap(), Duration::minutes(30));
        assert_eq!(parse_expiration("2H").unwrap(), Duration::hours(2));
        assert_eq!(parse_expiration("7D").unwrap(), Duration::days(7));
        assert!(parse_expiration("").is_err());
        assert!(parse_expiration("D").is_err());
        assert!(parse_expiration("5W").is_err());
        assert!(parse_expiration("-1D").is_err());
        assert!(parse_expiration("1.5H").is_err());
    }

    #[test]
    fn test_stored_name_strips_suffix() {
        assert_eq!(
            ContentEncoding::Gzip.stored_name("10kb.fna.gz"),
            "10kb.fna"
        );
        assert_eq!(
            ContentEncoding::Bzip2.stored_name("10kb.fna.bz2"),
            "10kb.fna"
        );
        assert_eq!(ContentEncoding::Gzip.stored_name("plain.txt"), "plain.txt");
        assert_eq!(ContentEncoding::Plain.stored_name("a.gz"), "a.gz");
        assert_eq!(ContentEncoding::Gzip.stored_name(".gz"), ".gz");
    }

    #[test]
    fn test_compression_and_format_parse() {
        assert_eq!(Compression::parse("").unwrap(), Compression::None);
        assert_eq!(Compression::parse("gzip").unwrap(), Compression::Gzip);
        assert_eq!(Compression::parse("zip").unwrap(), Compression::Zip);
        assert!(Compression::parse("lz4").is_err());

        assert_eq!(ArchiveFormat::parse("tar").unwrap(), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::parse("zip").unwrap(), ArchiveFormat::Zip);
        assert!(ArchiveFormat::parse("rar").is_err());
    }

    #[test]
    fn test_node_id_parse() {
        let id = NodeId::new();
        assert_eq!(NodeId::parse(&id.to_string()).unwrap(), id);
        assert!(NodeId::parse("not-a-uuid").is_err());
        assert_eq!(id.blob_key(), format!("nodes/{id}/data"));
    }
}
