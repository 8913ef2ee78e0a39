//! # Block Repository
//!
//! `BlockStore` is the caller-facing handle. It owns a backing store, the
//! schema registry and the configuration, and implements every operation
//! as "validate, build one changeset, commit" or "one block query, one
//! property query, recompose".
//!
//! | Module | Operations |
//! |--------|------------|
//! | `reader` | `get_block`, `get_blocks`, `list_blocks`, `query_blocks`, `get_block_with_links`, `get_linked_blocks` |
//! | `writer` | `create_block`, `update_block`, `delete_block` |
//! | `links` | `create_link`, `delete_link`, `bulk_create_links`, `bulk_delete_links` |
//! | `namespace` | `bulk_update_namespace` and batch reporting |
//!
//! Schema and branch operations live here.

pub mod diff;
pub mod links;
pub mod namespace;
pub mod reader;
pub mod retry;
pub mod writer;

use std::sync::Arc;

use hashbrown::HashSet;
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::model::{BlockId, BlockLink, BlockRow, BlockType};
use crate::property::Property;
use crate::schema::{Registered, SchemaRecord, SchemaRegistry, SchemaVersion};
use crate::scope::Scope;
use crate::storage::{BackingStore, BlockQuery, BranchInfo, LinkQuery, MemoryStore};
use crate::tx::{Changeset, CommitInfo, CommitMeta, Mutation};
use crate::{Error, Result};

use retry::with_retry;

pub use diff::{diff_properties, PropertyDiff};
pub use namespace::{BatchReport, ItemOutcome, ItemReport};
pub use reader::{BlockFilter, BlockWithLinks, LinkedBlock};

// ============================================================================
// BlockStore
// ============================================================================

/// Repository over a backing store.
pub struct BlockStore<B: BackingStore> {
    backend: B,
    registry: Arc<SchemaRegistry>,
    config: StoreConfig,
}

impl<B: BackingStore> BlockStore<B> {
    /// Open over `backend` with a fresh registry, loading every persisted
    /// schema of the default branch.
    pub async fn open(backend: B, config: StoreConfig) -> Result<Self> {
        Self::open_with_registry(backend, config, Arc::new(SchemaRegistry::new())).await
    }

    /// Open with a shared registry. Its contents are replaced by the
    /// schemas persisted on the default branch.
    pub async fn open_with_registry(backend: B, config: StoreConfig, registry: Arc<SchemaRegistry>) -> Result<Self> {
        config.validate()?;
        let store = Self { backend, registry, config };
        store.reload_schemas().await?;
        Ok(store)
    }

    /// Access the underlying backing store (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Default branch, default namespace.
    pub fn default_scope(&self) -> Scope {
        Scope::from_config(&self.config)
    }

    /// Default branch, given namespace.
    pub fn scope(&self, namespace: impl Into<String>) -> Scope {
        self.default_scope().in_namespace(namespace)
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Persist and cache a schema version. Re-registering the identical
    /// document is a no-op; a different document under an existing version
    /// is a `SchemaConflict`.
    #[instrument(skip_all, fields(node_type = %node_type, version = version))]
    pub async fn register_schema(
        &self,
        node_type: BlockType,
        version: u32,
        schema: serde_json::Value,
        author: Option<&str>,
    ) -> Result<Registered> {
        if self.registry.check(node_type, version, &schema)? == Registered::Unchanged {
            return Ok(Registered::Unchanged);
        }

        // Another handle over the same store may have registered this
        // version since our cache was loaded.
        let backend = &self.backend;
        let branch = self.config.default_branch.as_str();
        let persisted = with_retry("select_schemas", self.config.retries(), || {
            backend.select_schemas(branch, Some(node_type))
        })
        .await?;
        if let Some(existing) = persisted.into_iter().find(|r| r.version == version) {
            if existing.schema != schema {
                return Err(Error::SchemaConflict { node_type, version });
            }
            self.registry.register(existing)?;
            debug!(%node_type, version, "schema already persisted");
            return Ok(Registered::Unchanged);
        }

        let record = SchemaRecord::new(node_type, version, schema);
        let changeset = Changeset::new(CommitMeta::new(format!("register schema {node_type} v{version}")).by(author))
            .with(Mutation::InsertSchema(record.clone()));
        self.commit(&self.config.default_branch, changeset).await?;
        let outcome = self.registry.register(record)?;
        info!(%node_type, version, "schema registered");
        Ok(outcome)
    }

    pub fn resolve_schema(&self, node_type: BlockType, version: impl Into<SchemaVersion>) -> Result<SchemaRecord> {
        self.registry.resolve(node_type, version.into())
    }

    pub fn list_schema_versions(&self, node_type: BlockType) -> Vec<u32> {
        self.registry.list_versions(node_type)
    }

    /// Replace the registry contents with the persisted schemas.
    pub async fn reload_schemas(&self) -> Result<usize> {
        let backend = &self.backend;
        let branch = self.config.default_branch.as_str();
        let records = with_retry("select_schemas", self.config.retries(), || backend.select_schemas(branch, None)).await?;
        self.registry.load(records)
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// Fork `name` from `from`, or from the default branch.
    pub async fn create_branch(&self, name: &str, from: Option<&str>) -> Result<BranchInfo> {
        let from = from.unwrap_or(&self.config.default_branch);
        let info = self.backend.create_branch(name, from).await?;
        info!(branch = name, from, "branch created");
        Ok(info)
    }

    pub async fn branches(&self) -> Result<Vec<BranchInfo>> {
        self.backend.branches().await
    }

    /// Most recent commits of `branch` first.
    pub async fn log(&self, branch: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        self.backend.log(branch, limit).await
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    pub(crate) async fn commit(&self, branch: &str, changeset: Changeset) -> Result<CommitInfo> {
        let backend = &self.backend;
        let info = with_retry("commit", self.config.retries(), || backend.commit(branch, changeset.clone())).await?;
        info!(branch, commit = %info.hash, mutations = info.mutations, message = %info.message, "committed");
        Ok(info)
    }

    pub(crate) async fn select_rows(&self, branch: &str, query: &BlockQuery) -> Result<Vec<BlockRow>> {
        let backend = &self.backend;
        with_retry("select_blocks", self.config.retries(), || backend.select_blocks(branch, query)).await
    }

    pub(crate) async fn select_props(&self, branch: &str, ids: &[BlockId]) -> Result<Vec<Property>> {
        let backend = &self.backend;
        with_retry("select_properties", self.config.retries(), || backend.select_properties(branch, ids)).await
    }

    pub(crate) async fn select_links(&self, branch: &str, query: &LinkQuery) -> Result<Vec<BlockLink>> {
        let backend = &self.backend;
        with_retry("select_links", self.config.retries(), || backend.select_links(branch, query)).await
    }

    /// Batch calls above `max_batch_size` are rejected, never split.
    pub(crate) fn check_batch_size(&self, len: usize) -> Result<()> {
        let max = self.config.max_batch_size;
        if len > max {
            return Err(Error::ValidationError(format!(
                "batch of {len} items exceeds the limit of {max}; split the request"
            )));
        }
        Ok(())
    }
}

/// Fails on the first item that appears twice.
pub(crate) fn reject_duplicates<'a, T>(items: impl IntoIterator<Item = &'a T>) -> Result<()>
where
    T: std::hash::Hash + Eq + std::fmt::Display + 'a,
{
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item) {
            return Err(Error::ValidationError(format!("{item} appears more than once in the batch")));
        }
    }
    Ok(())
}

/// In-memory store for testing and embedding.
impl BlockStore<MemoryStore> {
    pub async fn open_memory() -> Result<Self> {
        Self::open_memory_with(StoreConfig::default()).await
    }

    pub async fn open_memory_with(config: StoreConfig) -> Result<Self> {
        let backend = MemoryStore::with_branch(&config.default_branch);
        Self::open(backend, config).await
    }
}
