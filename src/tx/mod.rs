//! Changesets: the unit of atomic write against the backing store.
//!
//! A repository operation builds one `Changeset` and commits it to a branch.
//! The store applies every mutation or none of them and records a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BlockId, BlockLink, BlockRow, LinkKey};
use crate::property::Property;
use crate::schema::SchemaRecord;

/// Message and author recorded with a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub message: String,
    pub author: Option<String>,
}

impl CommitMeta {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), author: None }
    }

    pub fn by(mut self, author: Option<&str>) -> Self {
        self.author = author.map(str::to_owned);
        self
    }
}

/// Opaque commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(pub String);

impl CommitHash {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recorded commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: CommitHash,
    pub branch: String,
    pub message: String,
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub mutations: usize,
}

/// Columns an update writes. `None` leaves the stored column alone, so a
/// concurrent change to an untouched column survives.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChanges {
    pub text: Option<String>,
    pub tags: Option<Vec<String>>,
    pub state: Option<Option<String>>,
    pub visibility: Option<Option<String>>,
    pub block_version: Option<Option<i64>>,
    pub parent_id: Option<Option<BlockId>>,
    pub schema_version: Option<Option<u32>>,
    pub embedding: Option<Option<Vec<f32>>>,
    pub updated_at: DateTime<Utc>,
}

impl BlockChanges {
    /// The columns of `new` that differ from `old`.
    pub fn between(old: &BlockRow, new: &BlockRow, updated_at: DateTime<Utc>) -> Self {
        fn changed<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
            (a != b).then(|| b.clone())
        }
        Self {
            text: changed(&old.text, &new.text),
            tags: changed(&old.tags, &new.tags),
            state: changed(&old.state, &new.state),
            visibility: changed(&old.visibility, &new.visibility),
            block_version: changed(&old.block_version, &new.block_version),
            parent_id: changed(&old.parent_id, &new.parent_id),
            schema_version: changed(&old.schema_version, &new.schema_version),
            embedding: changed(&old.embedding, &new.embedding),
            updated_at,
        }
    }

    /// True when no column besides `updated_at` is set.
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.tags.is_none()
            && self.state.is_none()
            && self.visibility.is_none()
            && self.block_version.is_none()
            && self.parent_id.is_none()
            && self.schema_version.is_none()
            && self.embedding.is_none()
    }

    pub fn apply(&self, row: &mut BlockRow) {
        if let Some(v) = &self.text {
            row.text = v.clone();
        }
        if let Some(v) = &self.tags {
            row.tags = v.clone();
        }
        if let Some(v) = &self.state {
            row.state = v.clone();
        }
        if let Some(v) = &self.visibility {
            row.visibility = v.clone();
        }
        if let Some(v) = &self.block_version {
            row.block_version = *v;
        }
        if let Some(v) = &self.parent_id {
            row.parent_id = v.clone();
        }
        if let Some(v) = &self.schema_version {
            row.schema_version = *v;
        }
        if let Some(v) = &self.embedding {
            row.embedding = v.clone();
        }
        row.updated_at = self.updated_at;
    }
}

/// One row-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertBlock(BlockRow),
    /// Set the listed columns of an existing block.
    UpdateBlock { id: BlockId, changes: BlockChanges },
    /// Fails while property or link rows still reference the block.
    DeleteBlock(BlockId),
    UpsertProperty(Property),
    DeleteProperty { block_id: BlockId, name: String },
    DeleteProperties(BlockId),
    InsertLink(BlockLink),
    DeleteLink(LinkKey),
    /// Every link with the block at either end.
    DeleteLinksFor(BlockId),
    InsertSchema(SchemaRecord),
    /// Move a block and its outgoing links to another namespace.
    SetNamespace { block_id: BlockId, namespace: String },
    /// Recompute `has_children` from the current parent pointers.
    RefreshHasChildren(BlockId),
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::InsertBlock(_) => "insert_block",
            Mutation::UpdateBlock { .. } => "update_block",
            Mutation::DeleteBlock(_) => "delete_block",
            Mutation::UpsertProperty(_) => "upsert_property",
            Mutation::DeleteProperty { .. } => "delete_property",
            Mutation::DeleteProperties(_) => "delete_properties",
            Mutation::InsertLink(_) => "insert_link",
            Mutation::DeleteLink(_) => "delete_link",
            Mutation::DeleteLinksFor(_) => "delete_links_for",
            Mutation::InsertSchema(_) => "insert_schema",
            Mutation::SetNamespace { .. } => "set_namespace",
            Mutation::RefreshHasChildren(_) => "refresh_has_children",
        }
    }
}

/// Ordered mutations committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    pub meta: CommitMeta,
    mutations: Vec<Mutation>,
}

impl Changeset {
    pub fn new(meta: CommitMeta) -> Self {
        Self { meta, mutations: Vec::new() }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn with(mut self, mutation: Mutation) -> Self {
        self.push(mutation);
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl Extend<Mutation> for Changeset {
    fn extend<I: IntoIterator<Item = Mutation>>(&mut self, iter: I) {
        self.mutations.extend(iter);
    }
}
