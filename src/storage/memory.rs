//! In-memory backing store.
//!
//! This is the reference implementation of `BackingStore`. Each branch owns
//! a full copy of the four tables. A commit applies its changeset to a clone
//! of the branch's tables under one write lock and swaps the clone in, so a
//! failed mutation leaves the branch untouched.
//!
//! The store enforces what the relational DDL declares:
//! - primary keys on `blocks`, `links` and `schemas`
//! - property and link rows reference existing blocks
//! - a block cannot be deleted while rows still reference it
//! - one populated value column per property row (structural in `Property`)
//!
//! Use it for tests and embedding. It does not persist anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{sql, BackingStore, BlockQuery, BranchInfo, LinkQuery};
use crate::model::{BlockId, BlockLink, BlockRow, BlockType, LinkKey};
use crate::property::Property;
use crate::schema::SchemaRecord;
use crate::tx::{Changeset, CommitHash, CommitInfo, Mutation};
use crate::{Error, Result};

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    blocks: IndexMap<BlockId, BlockRow>,
    /// Per block, in insertion order.
    properties: HashMap<BlockId, IndexMap<String, Property>>,
    links: IndexMap<LinkKey, BlockLink>,
    schemas: BTreeMap<(BlockType, u32), SchemaRecord>,
}

impl Tables {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::InsertBlock(row) => {
                if self.blocks.contains_key(&row.id) {
                    return Err(Error::persistence(format!("duplicate primary key blocks.id = {}", row.id)));
                }
                self.blocks.insert(row.id.clone(), row);
            }
            Mutation::UpdateBlock { id, changes } => {
                let row = self
                    .blocks
                    .get_mut(&id)
                    .ok_or_else(|| Error::persistence(format!("update of missing block {id}")))?;
                changes.apply(row);
            }
            Mutation::DeleteBlock(id) => {
                if self.properties.get(&id).is_some_and(|p| !p.is_empty()) {
                    return Err(Error::persistence(format!("foreign key: properties still reference block {id}")));
                }
                if self.links.keys().any(|k| k.from_id == id || k.to_id == id) {
                    return Err(Error::persistence(format!("foreign key: links still reference block {id}")));
                }
                if self.blocks.shift_remove(&id).is_none() {
                    return Err(Error::persistence(format!("delete of missing block {id}")));
                }
                self.properties.remove(&id);
            }
            Mutation::UpsertProperty(mut prop) => {
                if !self.blocks.contains_key(&prop.block_id) {
                    return Err(Error::persistence(format!(
                        "foreign key: property '{}' references missing block {}",
                        prop.name, prop.block_id
                    )));
                }
                let rows = self.properties.entry(prop.block_id.clone()).or_default();
                if let Some(existing) = rows.get(&prop.name) {
                    prop.created_at = existing.created_at;
                }
                rows.insert(prop.name.clone(), prop);
            }
            Mutation::DeleteProperty { block_id, name } => {
                if let Some(rows) = self.properties.get_mut(&block_id) {
                    rows.shift_remove(&name);
                }
            }
            Mutation::DeleteProperties(id) => {
                self.properties.remove(&id);
            }
            Mutation::InsertLink(link) => {
                for end in [&link.from_id, &link.to_id] {
                    if !self.blocks.contains_key(end) {
                        return Err(Error::persistence(format!("foreign key: link references missing block {end}")));
                    }
                }
                let key = link.key();
                if self.links.contains_key(&key) {
                    return Err(Error::persistence(format!("duplicate primary key links = {key}")));
                }
                self.links.insert(key, link);
            }
            Mutation::DeleteLink(key) => {
                self.links.shift_remove(&key);
            }
            Mutation::DeleteLinksFor(id) => {
                self.links.retain(|k, _| k.from_id != id && k.to_id != id);
            }
            Mutation::InsertSchema(record) => {
                let key = (record.node_type, record.version);
                match self.schemas.get(&key) {
                    Some(existing) if existing.schema == record.schema => {}
                    Some(_) => return Err(Error::SchemaConflict { node_type: key.0, version: key.1 }),
                    None => {
                        self.schemas.insert(key, record);
                    }
                }
            }
            Mutation::SetNamespace { block_id, namespace } => {
                let row = self
                    .blocks
                    .get_mut(&block_id)
                    .ok_or_else(|| Error::persistence(format!("namespace change of missing block {block_id}")))?;
                row.namespace = namespace.clone();
                row.updated_at = Utc::now();
                for link in self.links.values_mut().filter(|l| l.from_id == block_id) {
                    link.namespace = namespace.clone();
                }
            }
            Mutation::RefreshHasChildren(id) => {
                let has_children = self.blocks.values().any(|b| b.parent_id.as_ref() == Some(&id));
                if let Some(row) = self.blocks.get_mut(&id) {
                    row.has_children = has_children;
                }
            }
        }
        Ok(())
    }

    fn block_matches(&self, row: &BlockRow, query: &BlockQuery) -> bool {
        if query.namespace.as_ref().is_some_and(|ns| *ns != row.namespace) {
            return false;
        }
        if query.ids.as_ref().is_some_and(|ids| !ids.contains(&row.id)) {
            return false;
        }
        if query.block_type.is_some_and(|t| t != row.block_type) {
            return false;
        }
        if !query.tags.iter().all(|t| row.tags.contains(t)) {
            return false;
        }
        if query.parent_id.is_some() && query.parent_id != row.parent_id {
            return false;
        }
        let props = self.properties.get(&row.id);
        query.property_filters.iter().all(|f| {
            props
                .and_then(|p| p.get(&f.name))
                .is_some_and(|p| p.matches(&f.op))
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Branch {
    tables: Tables,
    log: Vec<CommitInfo>,
}

impl Branch {
    fn info(&self, name: &str) -> BranchInfo {
        BranchInfo { name: name.to_owned(), head: self.log.last().map(|c| c.hash.clone()) }
    }
}

/// Row counts of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub blocks: usize,
    pub properties: usize,
    pub links: usize,
    pub schemas: usize,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Branch-aware in-memory store. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Branch>>>,
}

fn unknown_branch(branch: &str) -> Error {
    Error::persistence(format!("branch '{branch}' does not exist"))
}

impl MemoryStore {
    /// A store with a single empty `main` branch.
    pub fn new() -> Self {
        Self::with_branch("main")
    }

    /// A store with a single empty branch called `name`.
    pub fn with_branch(name: &str) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(name.to_owned(), Branch::default());
        Self { inner: Arc::new(RwLock::new(branches)) }
    }

    /// Row counts of `branch`, `None` if it does not exist.
    pub fn counts(&self, branch: &str) -> Option<TableCounts> {
        let branches = self.inner.read();
        let t = &branches.get(branch)?.tables;
        Some(TableCounts {
            blocks: t.blocks.len(),
            properties: t.properties.values().map(IndexMap::len).sum(),
            links: t.links.len(),
            schemas: t.schemas.len(),
        })
    }

    fn read_branch<T>(&self, branch: &str, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let branches = self.inner.read();
        let state = branches.get(branch).ok_or_else(|| unknown_branch(branch))?;
        Ok(f(&state.tables))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BackingStore impl
// ============================================================================

#[async_trait]
impl BackingStore for MemoryStore {
    async fn branches(&self) -> Result<Vec<BranchInfo>> {
        Ok(self.inner.read().iter().map(|(name, b)| b.info(name)).collect())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<BranchInfo> {
        if name.trim().is_empty() {
            return Err(Error::ValidationError("branch name must not be empty".into()));
        }
        let mut branches = self.inner.write();
        if branches.contains_key(name) {
            return Err(Error::persistence(format!("branch '{name}' already exists")));
        }
        let fork = branches.get(from).ok_or_else(|| unknown_branch(from))?.clone();
        let info = fork.info(name);
        branches.insert(name.to_owned(), fork);
        debug!(branch = name, from, "branch created");
        Ok(info)
    }

    async fn log(&self, branch: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        let branches = self.inner.read();
        let state = branches.get(branch).ok_or_else(|| unknown_branch(branch))?;
        Ok(state.log.iter().rev().take(limit).cloned().collect())
    }

    async fn select_blocks(&self, branch: &str, query: &BlockQuery) -> Result<Vec<BlockRow>> {
        self.read_branch(branch, |t| {
            let mut rows: Vec<BlockRow> =
                t.blocks.values().filter(|row| t.block_matches(row, query)).cloned().collect();
            rows.sort_by_key(|r| r.created_at);
            let limit = query.limit.unwrap_or(usize::MAX);
            rows.into_iter().skip(query.offset).take(limit).collect()
        })
    }

    async fn select_properties(&self, branch: &str, ids: &[BlockId]) -> Result<Vec<Property>> {
        self.read_branch(branch, |t| {
            let mut seen = HashSet::new();
            ids.iter()
                .filter(|id| seen.insert(*id))
                .filter_map(|id| t.properties.get(id))
                .flat_map(|rows| rows.values().cloned())
                .collect()
        })
    }

    async fn select_links(&self, branch: &str, query: &LinkQuery) -> Result<Vec<BlockLink>> {
        self.read_branch(branch, |t| t.links.values().filter(|l| query.matches(l)).cloned().collect())
    }

    async fn select_schemas(&self, branch: &str, node_type: Option<BlockType>) -> Result<Vec<SchemaRecord>> {
        self.read_branch(branch, |t| {
            t.schemas
                .values()
                .filter(|r| node_type.is_none_or(|nt| nt == r.node_type))
                .cloned()
                .collect()
        })
    }

    async fn commit(&self, branch: &str, changeset: Changeset) -> Result<CommitInfo> {
        if changeset.is_empty() {
            return Err(Error::persistence("nothing to commit"));
        }
        let mut branches = self.inner.write();
        let state = branches.get_mut(branch).ok_or_else(|| unknown_branch(branch))?;

        let meta = changeset.meta.clone();
        let mutations = changeset.len();
        let mut staged = state.tables.clone();
        for mutation in changeset.into_mutations() {
            debug!(branch, statement = %sql::render_mutation(&mutation), "apply");
            staged.apply(mutation)?;
        }
        state.tables = staged;

        let info = CommitInfo {
            hash: CommitHash::generate(),
            branch: branch.to_owned(),
            message: meta.message,
            author: meta.author,
            timestamp: Utc::now(),
            mutations,
        };
        state.log.push(info.clone());
        Ok(info)
    }
}

// ============================================================================
// Tests
// ============================================================================
