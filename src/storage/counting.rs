//! Query-counting wrapper.
//!
//! Wraps any store, counts every call per table and logs the statement text
//! it stands for at `debug`. Batch-read tests use it to pin the number of
//! round trips a repository operation costs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{sql, BackingStore, BlockQuery, BranchInfo, LinkQuery};
use crate::model::{BlockId, BlockLink, BlockRow, BlockType};
use crate::property::Property;
use crate::schema::SchemaRecord;
use crate::tx::{Changeset, CommitInfo};
use crate::Result;

#[derive(Debug, Default)]
struct Counters {
    blocks: AtomicUsize,
    properties: AtomicUsize,
    links: AtomicUsize,
    schemas: AtomicUsize,
    commits: AtomicUsize,
}

/// Snapshot of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryCounts {
    pub blocks: usize,
    pub properties: usize,
    pub links: usize,
    pub schemas: usize,
    pub commits: usize,
}

impl QueryCounts {
    /// Read queries of all tables.
    pub fn reads(&self) -> usize {
        self.blocks + self.properties + self.links + self.schemas
    }
}

#[derive(Debug, Clone)]
pub struct CountingStore<B> {
    inner: B,
    counters: Arc<Counters>,
}

impl<B: BackingStore> CountingStore<B> {
    pub fn new(inner: B) -> Self {
        Self { inner, counters: Arc::new(Counters::default()) }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn counts(&self) -> QueryCounts {
        let c = &self.counters;
        QueryCounts {
            blocks: c.blocks.load(Ordering::Relaxed),
            properties: c.properties.load(Ordering::Relaxed),
            links: c.links.load(Ordering::Relaxed),
            schemas: c.schemas.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        let c = &self.counters;
        for counter in [&c.blocks, &c.properties, &c.links, &c.schemas, &c.commits] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl<B: BackingStore> BackingStore for CountingStore<B> {
    async fn branches(&self) -> Result<Vec<BranchInfo>> {
        self.inner.branches().await
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<BranchInfo> {
        debug!(statement = %sql::render_create_branch(name, from), "query");
        self.inner.create_branch(name, from).await
    }

    async fn log(&self, branch: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        self.inner.log(branch, limit).await
    }

    async fn select_blocks(&self, branch: &str, query: &BlockQuery) -> Result<Vec<BlockRow>> {
        self.counters.blocks.fetch_add(1, Ordering::Relaxed);
        debug!(branch, statement = %sql::render_block_query(query), "query");
        self.inner.select_blocks(branch, query).await
    }

    async fn select_properties(&self, branch: &str, ids: &[BlockId]) -> Result<Vec<Property>> {
        self.counters.properties.fetch_add(1, Ordering::Relaxed);
        debug!(branch, statement = %sql::render_property_query(ids), "query");
        self.inner.select_properties(branch, ids).await
    }

    async fn select_links(&self, branch: &str, query: &LinkQuery) -> Result<Vec<BlockLink>> {
        self.counters.links.fetch_add(1, Ordering::Relaxed);
        debug!(branch, statement = %sql::render_link_query(query), "query");
        self.inner.select_links(branch, query).await
    }

    async fn select_schemas(&self, branch: &str, node_type: Option<BlockType>) -> Result<Vec<SchemaRecord>> {
        self.counters.schemas.fetch_add(1, Ordering::Relaxed);
        debug!(branch, statement = %sql::render_schema_query(node_type), "query");
        self.inner.select_schemas(branch, node_type).await
    }

    async fn commit(&self, branch: &str, changeset: Changeset) -> Result<CommitInfo> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        debug!(branch, statement = %sql::render_checkout(branch), "checkout");
        debug!(branch, statement = %sql::render_commit(&changeset.meta), mutations = changeset.len(), "commit");
        self.inner.commit(branch, changeset).await
    }
}
