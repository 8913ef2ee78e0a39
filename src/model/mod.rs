//! # Block Model
//!
//! Plain DTOs for blocks, links and metadata values. These cross every
//! boundary: caller ↔ repository ↔ backing store.
//!
//! Design rule: no storage types here. This module is pure data — no I/O,
//! no state, no async.

pub mod block;
pub mod link;
pub mod value;
pub mod metadata;

pub use block::{BlockId, BlockPatch, BlockRow, BlockType, MemoryBlock, NewBlock};
pub use link::{BlockLink, Direction, LinkKey, LinkOptions, LinkRelation, LinkSpec};
pub use value::MetaValue;
pub use metadata::Metadata;
