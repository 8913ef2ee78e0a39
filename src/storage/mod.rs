//! # Backing Store Trait
//!
//! The contract between the block repository and a version-controlled
//! relational engine. The engine keeps four tables (`blocks`, `properties`,
//! `links`, `schemas`, see [`sql::DDL`]) per branch and applies a
//! [`Changeset`] atomically as one commit.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | Branch-aware in-memory reference store |
//! | `CountingStore` | `counting` | Wrapper that counts issued queries |

pub mod counting;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{BlockId, BlockLink, BlockRow, BlockType, Direction, LinkKey, LinkRelation};
use crate::property::PropertyFilter;
use crate::property::Property;
use crate::schema::SchemaRecord;
use crate::tx::{Changeset, CommitHash, CommitInfo};
use crate::Result;

pub use counting::CountingStore;
pub use memory::MemoryStore;

// ============================================================================
// Queries
// ============================================================================

/// Selection over the `blocks` table. Every set field narrows the result.
///
/// Rows come back oldest first (`created_at`, then insertion order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockQuery {
    pub namespace: Option<String>,
    pub ids: Option<Vec<BlockId>>,
    pub block_type: Option<BlockType>,
    /// Block must carry every listed tag.
    pub tags: Vec<String>,
    pub parent_id: Option<BlockId>,
    /// Block must have a property row satisfying each filter.
    pub property_filters: Vec<PropertyFilter>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl BlockQuery {
    pub fn by_ids(ids: impl IntoIterator<Item = BlockId>) -> Self {
        Self { ids: Some(ids.into_iter().collect()), ..Self::default() }
    }

    pub fn in_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.map(str::to_owned);
        self
    }
}

/// Which links a [`LinkQuery`] selects.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    /// Links with one of `ids` at the given end(s).
    Touching { ids: Vec<BlockId>, direction: Direction },
    /// Links with exactly these identities.
    Keys(Vec<LinkKey>),
}

/// Selection over the `links` table.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkQuery {
    pub target: LinkTarget,
    pub relation: Option<LinkRelation>,
    /// Namespace of the source block.
    pub namespace: Option<String>,
}

impl LinkQuery {
    pub fn touching(ids: impl IntoIterator<Item = BlockId>, direction: Direction) -> Self {
        Self {
            target: LinkTarget::Touching { ids: ids.into_iter().collect(), direction },
            relation: None,
            namespace: None,
        }
    }

    pub fn keys(keys: impl IntoIterator<Item = LinkKey>) -> Self {
        Self { target: LinkTarget::Keys(keys.into_iter().collect()), relation: None, namespace: None }
    }

    pub fn with_relation(mut self, relation: Option<LinkRelation>) -> Self {
        self.relation = relation;
        self
    }

    pub fn in_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.map(str::to_owned);
        self
    }

    /// Row predicate, shared by in-process stores.
    pub fn matches(&self, link: &BlockLink) -> bool {
        let hit = match &self.target {
            LinkTarget::Touching { ids, direction } => match direction {
                Direction::Outgoing => ids.contains(&link.from_id),
                Direction::Incoming => ids.contains(&link.to_id),
                Direction::Both => ids.contains(&link.from_id) || ids.contains(&link.to_id),
            },
            LinkTarget::Keys(keys) => keys.iter().any(|k| {
                k.from_id == link.from_id && k.to_id == link.to_id && k.relation == link.relation
            }),
        };
        hit && self.relation.is_none_or(|r| r == link.relation)
            && self.namespace.as_deref().is_none_or(|ns| ns == link.namespace)
    }
}

/// A branch and its head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub head: Option<CommitHash>,
}

// ============================================================================
// BackingStore Trait
// ============================================================================

/// The persistence contract.
///
/// Every call names the branch it works on. An unknown branch is a
/// non-transient `PersistenceFailure`. Implementations report failures the
/// caller may retry (lost connection, lock timeout, serialization conflict)
/// with `transient: true`; the repository retries those once.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    // ========================================================================
    // Branches
    // ========================================================================

    async fn branches(&self) -> Result<Vec<BranchInfo>>;

    /// Fork `name` from the head of `from`.
    async fn create_branch(&self, name: &str, from: &str) -> Result<BranchInfo>;

    /// Most recent commits first.
    async fn log(&self, branch: &str, limit: usize) -> Result<Vec<CommitInfo>>;

    // ========================================================================
    // Reads
    // ========================================================================

    async fn select_blocks(&self, branch: &str, query: &BlockQuery) -> Result<Vec<BlockRow>>;

    /// Property rows of all `ids` in one round trip, grouped by block and in
    /// each block's insertion order.
    async fn select_properties(&self, branch: &str, ids: &[BlockId]) -> Result<Vec<Property>>;

    async fn select_links(&self, branch: &str, query: &LinkQuery) -> Result<Vec<BlockLink>>;

    async fn select_schemas(&self, branch: &str, node_type: Option<BlockType>) -> Result<Vec<SchemaRecord>>;

    // ========================================================================
    // Writes
    // ========================================================================

    /// Apply every mutation of `changeset` or none, and record a commit.
    async fn commit(&self, branch: &str, changeset: Changeset) -> Result<CommitInfo>;
}
