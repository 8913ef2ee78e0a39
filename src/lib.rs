//! # memblock — versioned, typed memory-block store
//!
//! A memory block is a unit of knowledge or work whose type-dependent
//! metadata is split into a normalized property table instead of an opaque
//! JSON column, on top of a branch-aware, version-controlled backing store.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `BackingStore` is the contract between repository and engine
//! 2. **One value column**: `PropertyValue` makes a row with zero or two values unrepresentable
//! 3. **Schemas are data**: new block types or versions are registry appends
//! 4. **Two queries per batch read**: blocks, then all their properties at once
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memblock::{metadata, BlockStore, BlockType, NewBlock};
//!
//! # async fn example() -> memblock::Result<()> {
//! let store = BlockStore::open_memory().await?;
//! let scope = store.default_scope();
//!
//! let block = store
//!     .create_block(
//!         NewBlock::new(BlockType::Task, "write the release notes")
//!             .with_metadata(metadata! { "priority" => 1, "done" => false }),
//!         &scope,
//!         Some("ada"),
//!     )
//!     .await?;
//!
//! let read = store.get_block(&block.id, &scope).await?;
//! assert_eq!(read.metadata, block.metadata);
//! # Ok(())
//! # }
//! ```
//!
//! ## Backing Stores
//!
//! | Store | Description |
//! |-------|-------------|
//! | `MemoryStore` | In-memory, branch-aware; for tests and embedding |
//! | `CountingStore` | Wraps another store and counts issued queries |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod model;
pub mod property;
pub mod repo;
pub mod schema;
pub mod scope;
pub mod storage;
pub mod tx;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    BlockId, BlockLink, BlockPatch, BlockType, Direction, LinkKey, LinkOptions, LinkRelation, LinkSpec,
    MemoryBlock, MetaValue, Metadata, NewBlock,
};

// ============================================================================
// Re-exports: Properties + Schemas
// ============================================================================

pub use property::{FilterOp, Property, PropertyFilter, PropertyType, PropertyValue};
pub use schema::{Registered, SchemaRecord, SchemaRegistry, SchemaVersion};

// ============================================================================
// Re-exports: Repository + Storage
// ============================================================================

pub use config::StoreConfig;
pub use repo::{BatchReport, BlockFilter, BlockStore, BlockWithLinks, ItemOutcome, LinkedBlock};
pub use scope::Scope;
pub use storage::{BackingStore, BlockQuery, CountingStore, LinkQuery, MemoryStore};
pub use tx::{Changeset, CommitInfo, CommitMeta, Mutation};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid value for property '{name}': {reason}")]
    InvalidPropertyValue { name: String, reason: String },

    #[error("No schema registered for {node_type} ({version})")]
    SchemaNotFound { node_type: BlockType, version: SchemaVersion },

    #[error("Schema {node_type} v{version} is already registered with a different document")]
    SchemaConflict { node_type: BlockType, version: u32 },

    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Unknown block: {0}")]
    UnknownBlock(BlockId),

    #[error("Persistence failure (transient: {transient}): {message}")]
    PersistenceFailure { message: String, transient: bool },

    #[error("Batch partially failed: {0}")]
    BatchPartialFailure(BatchReport),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// A failure the store will not recover from by retrying.
    pub fn persistence(message: impl Into<String>) -> Self {
        Error::PersistenceFailure { message: message.into(), transient: false }
    }

    /// A failure worth one retry (lost connection, lock timeout).
    pub fn transient(message: impl Into<String>) -> Self {
        Error::PersistenceFailure { message: message.into(), transient: true }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PersistenceFailure { transient: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
