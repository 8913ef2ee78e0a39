//! Typed, directed link between two blocks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BlockId;

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Closed set of link relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    RelatedTo,
    ChildOf,
    ParentOf,
    DependsOn,
    Blocks,
    BlockedBy,
    BelongsToEpic,
    EpicContains,
    Mentions,
    References,
    Duplicates,
    Supersedes,
}

impl LinkRelation {
    pub const ALL: [LinkRelation; 12] = [
        LinkRelation::RelatedTo,
        LinkRelation::ChildOf,
        LinkRelation::ParentOf,
        LinkRelation::DependsOn,
        LinkRelation::Blocks,
        LinkRelation::BlockedBy,
        LinkRelation::BelongsToEpic,
        LinkRelation::EpicContains,
        LinkRelation::Mentions,
        LinkRelation::References,
        LinkRelation::Duplicates,
        LinkRelation::Supersedes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRelation::RelatedTo => "related_to",
            LinkRelation::ChildOf => "child_of",
            LinkRelation::ParentOf => "parent_of",
            LinkRelation::DependsOn => "depends_on",
            LinkRelation::Blocks => "blocks",
            LinkRelation::BlockedBy => "blocked_by",
            LinkRelation::BelongsToEpic => "belongs_to_epic",
            LinkRelation::EpicContains => "epic_contains",
            LinkRelation::Mentions => "mentions",
            LinkRelation::References => "references",
            LinkRelation::Duplicates => "duplicates",
            LinkRelation::Supersedes => "supersedes",
        }
    }

}

impl fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkRelation {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        LinkRelation::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| crate::Error::ValidationError(format!("unknown link relation '{s}'")))
    }
}

/// Composite identity of a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub from_id: BlockId,
    pub to_id: BlockId,
    pub relation: LinkRelation,
}

impl LinkKey {
    pub fn new(from_id: impl Into<BlockId>, to_id: impl Into<BlockId>, relation: LinkRelation) -> Self {
        Self { from_id: from_id.into(), to_id: to_id.into(), relation }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from_id, self.relation, self.to_id)
    }
}

/// A row of the `links` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockLink {
    pub from_id: BlockId,
    pub to_id: BlockId,
    pub relation: LinkRelation,
    /// Higher sorts first among links of the same source.
    pub priority: i32,
    pub link_metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
    /// Namespace of the source block.
    pub namespace: String,
    pub created_at: DateTime<Utc>,
}

impl BlockLink {
    pub fn key(&self) -> LinkKey {
        LinkKey {
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
            relation: self.relation,
        }
    }

    /// The "other" end of the link from the given block.
    pub fn other_block(&self, from: &BlockId) -> Option<&BlockId> {
        if *from == self.from_id { Some(&self.to_id) }
        else if *from == self.to_id { Some(&self.from_id) }
        else { None }
    }

    /// Priority descending, then creation time ascending.
    pub fn display_order(a: &BlockLink, b: &BlockLink) -> std::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.key().cmp(&b.key()))
    }
}

/// Optional attributes for a new link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkOptions {
    pub priority: i32,
    pub link_metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
}

impl LinkOptions {
    pub fn priority(priority: i32) -> Self {
        Self { priority, ..Self::default() }
    }
}

/// One entry of a bulk link creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub key: LinkKey,
    pub options: LinkOptions,
}

impl LinkSpec {
    pub fn new(from_id: impl Into<BlockId>, to_id: impl Into<BlockId>, relation: LinkRelation) -> Self {
        Self { key: LinkKey::new(from_id, to_id, relation), options: LinkOptions::default() }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }
}
