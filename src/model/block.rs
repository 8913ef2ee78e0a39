//! Memory block — the unit of stored knowledge/work.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MetaValue, Metadata};

/// Globally unique block identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl BlockId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self { Self(s) }
}

/// Closed set of block types. The type selects which schema applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Knowledge,
    Task,
    Project,
    Doc,
    Log,
    Epic,
    Bug,
    Interaction,
}

impl BlockType {
    pub const ALL: [BlockType; 8] = [
        BlockType::Knowledge,
        BlockType::Task,
        BlockType::Project,
        BlockType::Doc,
        BlockType::Log,
        BlockType::Epic,
        BlockType::Bug,
        BlockType::Interaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Knowledge => "knowledge",
            BlockType::Task => "task",
            BlockType::Project => "project",
            BlockType::Doc => "doc",
            BlockType::Log => "log",
            BlockType::Epic => "epic",
            BlockType::Bug => "bug",
            BlockType::Interaction => "interaction",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        BlockType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::ValidationError(format!("unknown block type '{s}'")))
    }
}

// ============================================================================
// Persisted row
// ============================================================================

/// The `blocks` table row. Metadata is NOT a column; it lives in `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: BlockId,
    pub namespace: String,
    pub block_type: BlockType,
    pub schema_version: Option<u32>,
    pub text: String,
    pub state: Option<String>,
    pub visibility: Option<String>,
    pub block_version: Option<i64>,
    pub parent_id: Option<BlockId>,
    pub has_children: bool,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Reconstructed block
// ============================================================================

/// A block as callers see it: the row plus metadata recomposed from its
/// property rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: BlockId,
    pub namespace: String,
    pub block_type: BlockType,
    pub schema_version: Option<u32>,
    pub text: String,
    pub state: Option<String>,
    pub visibility: Option<String>,
    pub block_version: Option<i64>,
    pub parent_id: Option<BlockId>,
    pub has_children: bool,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryBlock {
    pub fn from_row(row: BlockRow, metadata: Metadata) -> Self {
        Self {
            id: row.id,
            namespace: row.namespace,
            block_type: row.block_type,
            schema_version: row.schema_version,
            text: row.text,
            state: row.state,
            visibility: row.visibility,
            block_version: row.block_version,
            parent_id: row.parent_id,
            has_children: row.has_children,
            tags: row.tags,
            metadata,
            embedding: row.embedding,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }
}

// ============================================================================
// Write inputs
// ============================================================================

/// Input for `create_block`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlock {
    pub block_type: BlockType,
    pub text: String,
    pub metadata: Metadata,
    pub tags: Vec<String>,
    pub schema_version: Option<u32>,
    pub state: Option<String>,
    pub visibility: Option<String>,
    pub block_version: Option<i64>,
    pub parent_id: Option<BlockId>,
    pub embedding: Option<Vec<f32>>,
    /// Metadata keys whose values were derived rather than authored.
    pub computed_keys: Vec<String>,
    /// Caller-chosen id; generated when absent.
    pub id: Option<BlockId>,
}

impl NewBlock {
    pub fn new(block_type: BlockType, text: impl Into<String>) -> Self {
        Self {
            block_type,
            text: text.into(),
            metadata: Metadata::new(),
            tags: Vec::new(),
            schema_version: None,
            state: None,
            visibility: None,
            block_version: None,
            parent_id: None,
            embedding: None,
            computed_keys: Vec::new(),
            id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_parent(mut self, parent: BlockId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_id(mut self, id: BlockId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn computed(mut self, key: impl Into<String>) -> Self {
        self.computed_keys.push(key.into());
        self
    }
}

/// Partial update for `update_block`.
///
/// `metadata` is a patch: present keys overwrite, absent keys are left alone,
/// `MetaValue::Null` removes the key. Outer `Option`s mean "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPatch {
    pub metadata: Metadata,
    pub text: Option<String>,
    pub tags: Option<Vec<String>>,
    pub state: Option<Option<String>>,
    pub visibility: Option<Option<String>>,
    pub block_version: Option<Option<i64>>,
    pub parent_id: Option<Option<BlockId>>,
    pub schema_version: Option<Option<u32>>,
    pub embedding: Option<Option<Vec<f32>>>,
    pub computed_keys: Vec<String>,
}

impl BlockPatch {
    pub fn metadata(metadata: Metadata) -> Self {
        Self { metadata, ..Self::default() }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), MetaValue::Null);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_parent(mut self, parent: Option<BlockId>) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_type_parse() {
        assert_eq!("epic".parse::<BlockType>().unwrap(), BlockType::Epic);
        assert!("widget".parse::<BlockType>().is_err());
        for t in BlockType::ALL {
            assert_eq!(t.as_str().parse::<BlockType>().unwrap(), t);
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(BlockId::generate(), BlockId::generate());
    }
}
