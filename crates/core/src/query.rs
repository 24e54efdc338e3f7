//! Node query model and attribute index flattening.

use crate::node::Attributes;
use serde_json::Value;

/// Query parameters with a fixed meaning that are never treated as filters.
pub const RESERVED_PARAMS: &[&str] = &[
    "query",
    "querynode",
    "limit",
    "offset",
    "download_url",
    "archive",
    "download",
    "compression",
];

/// Node-level fields that may be filtered on in `querynode` mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeField {
    Id,
    FileName,
    FileSize,
    FileMd5,
    Owner,
}

impl NodeField {
    pub fn parse(key: &str) -> crate::Result<Self> {
        match key {
            "id" => Ok(Self::Id),
            "file.name" => Ok(Self::FileName),
            "file.size" => Ok(Self::FileSize),
            "file.checksum.md5" => Ok(Self::FileMd5),
            "owner" => Ok(Self::Owner),
            other => Err(crate::Error::InvalidQuery(format!(
                "unknown query key: {other}"
            ))),
        }
    }
}

/// A single equality predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Attribute at a dotted path equals the value.
    Attribute { path: String, value: String },
    /// Node field equals the value.
    Field { field: NodeField, value: String },
}

/// Which nodes a caller may see.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NodeScope {
    #[default]
    All,
    /// Nodes owned by the given token id plus unowned nodes.
    /// `None` limits the caller to unowned nodes only.
    VisibleTo(Option<String>),
}

/// A resolved node query.
#[derive(Clone, Debug, Default)]
pub struct NodeQuery {
    pub filters: Vec<Filter>,
    pub scope: NodeScope,
    /// Maximum rows to return; `None` returns the full matched set.
    pub limit: Option<u64>,
    pub offset: u64,
}

impl NodeQuery {
    /// Build attribute filters from `key=value` pairs, skipping reserved keys.
    pub fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let filters = pairs
            .into_iter()
            .filter(|(key, _)| !key.is_empty() && !RESERVED_PARAMS.contains(key))
            .map(|(key, value)| Filter::Attribute {
                path: key.to_string(),
                value: value.to_string(),
            })
            .collect();
        Self {
            filters,
            ..Default::default()
        }
    }

    /// Build node-field filters from `key=value` pairs, rejecting unknown keys.
    pub fn node_fields<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> crate::Result<Self> {
        let mut filters = Vec::new();
        for (key, value) in pairs {
            if key.is_empty() || RESERVED_PARAMS.contains(&key) {
                continue;
            }
            filters.push(Filter::Field {
                field: NodeField::parse(key)?,
                value: value.to_string(),
            });
        }
        Ok(Self {
            filters,
            ..Default::default()
        })
    }

    pub fn with_scope(mut self, scope: NodeScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_page(mut self, limit: Option<u64>, offset: u64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Render a scalar JSON value the way it is stored in the attribute index.
pub fn index_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Flatten attributes into `(dotted path, canonical value)` index entries.
///
/// Array elements are indexed under the array's own path, so a filter matches
/// when any element equals the requested value.
pub fn index_entries(attributes: &Attributes) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for (key, value) in attributes {
        flatten(key.clone(), value, &mut entries);
    }
    entries
}

fn flatten(path: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(format!("{path}.{key}"), child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten(path.clone(), item, out);
            }
        }
        scalar => {
            if let Some(rendered) = index_value(scalar) {
                out.push((path, rendered));
            }
        }
    }
}
