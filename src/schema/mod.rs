//! # Schema Registry
//!
//! Per-type, per-version description of the metadata a block is expected to
//! carry. Schemas are data (JSON Schema draft 7), not code, so a new block
//! type or version is an append, never a change to a dispatch tree.
//!
//! Validation covers the whole draft. Read-time retyping looks at
//! `properties.*` only: `type` (`integer`), `enum`, `format`
//! (`date` / `date-time`) and one level of `items`.
//!
//! The registry is an in-process cache over the append-only `schemas`
//! table. `BlockStore` loads it at startup and writes new versions through
//! the backing store before caching them.

mod compiled;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{BlockType, Metadata};
use crate::{Error, Result};

use compiled::CompiledSchema;

/// A row of the `schemas` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub node_type: BlockType,
    pub version: u32,
    pub schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SchemaRecord {
    pub fn new(node_type: BlockType, version: u32, schema: serde_json::Value) -> Self {
        Self { node_type, version, schema, created_at: Utc::now() }
    }
}

/// Which version to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
    Exact(u32),
    Latest,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::Exact(v) => write!(f, "v{v}"),
            SchemaVersion::Latest => write!(f, "latest"),
        }
    }
}

impl From<u32> for SchemaVersion {
    fn from(v: u32) -> Self { SchemaVersion::Exact(v) }
}

impl From<Option<u32>> for SchemaVersion {
    fn from(v: Option<u32>) -> Self { v.map_or(SchemaVersion::Latest, SchemaVersion::Exact) }
}

/// Outcome of a registration attempt that did not conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// New `(node_type, version)` pair.
    Added,
    /// Identical schema already present.
    Unchanged,
}

struct Entry {
    record: SchemaRecord,
    compiled: CompiledSchema,
}

/// Versioned catalog of metadata shapes.
#[derive(Default)]
pub struct SchemaRegistry {
    entries: RwLock<BTreeMap<(BlockType, u32), Entry>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with `records` (startup load / reload).
    pub fn load(&self, records: impl IntoIterator<Item = SchemaRecord>) -> Result<usize> {
        let mut fresh = BTreeMap::new();
        for record in records {
            let compiled = CompiledSchema::compile(&record.schema)?;
            fresh.insert((record.node_type, record.version), Entry { record, compiled });
        }
        let count = fresh.len();
        *self.entries.write() = fresh;
        debug!(count, "schema registry loaded");
        Ok(count)
    }

    /// Would registering `schema` add, be a no-op, or conflict?
    ///
    /// Also rejects documents the registry cannot interpret.
    pub fn check(&self, node_type: BlockType, version: u32, schema: &serde_json::Value) -> Result<Registered> {
        CompiledSchema::compile(schema)?;
        match self.entries.read().get(&(node_type, version)) {
            None => Ok(Registered::Added),
            Some(e) if e.record.schema == *schema => Ok(Registered::Unchanged),
            Some(_) => Err(Error::SchemaConflict { node_type, version }),
        }
    }

    /// Append a record. Identical re-registration is a no-op; a different
    /// schema under an existing version is a `SchemaConflict`.
    pub fn register(&self, record: SchemaRecord) -> Result<Registered> {
        let compiled = CompiledSchema::compile(&record.schema)?;
        let key = (record.node_type, record.version);
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(e) if e.record.schema == record.schema => Ok(Registered::Unchanged),
            Some(_) => Err(Error::SchemaConflict { node_type: key.0, version: key.1 }),
            None => {
                entries.insert(key, Entry { record, compiled });
                Ok(Registered::Added)
            }
        }
    }

    pub fn resolve(&self, node_type: BlockType, version: SchemaVersion) -> Result<SchemaRecord> {
        let entries = self.entries.read();
        Self::find(&entries, node_type, version)
            .map(|e| e.record.clone())
            .ok_or(Error::SchemaNotFound { node_type, version })
    }

    pub fn latest_version(&self, node_type: BlockType) -> Option<u32> {
        self.list_versions(node_type).last().copied()
    }

    /// Registered versions of `node_type`, ascending.
    pub fn list_versions(&self, node_type: BlockType) -> Vec<u32> {
        self.entries
            .read()
            .keys()
            .filter(|(t, _)| *t == node_type)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Check metadata against the resolved schema. Every violation is
    /// reported in one `ValidationError`.
    pub fn validate(&self, node_type: BlockType, version: SchemaVersion, metadata: &Metadata) -> Result<()> {
        let entries = self.entries.read();
        let entry = Self::find(&entries, node_type, version)
            .ok_or(Error::SchemaNotFound { node_type, version })?;
        let violations = entry.compiled.violations(metadata);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::ValidationError(format!(
                "{node_type} metadata does not match schema v{}: {}",
                entry.record.version,
                violations.join("; ")
            )))
        }
    }

    /// Retype values the property table stores lossily, as the schema
    /// declares them. Unknown schema → metadata unchanged.
    pub fn reconstruct(&self, node_type: BlockType, version: SchemaVersion, metadata: Metadata) -> Metadata {
        let entries = self.entries.read();
        match Self::find(&entries, node_type, version) {
            Some(entry) => entry.compiled.reconstruct(metadata),
            None => metadata,
        }
    }

    fn find(
        entries: &BTreeMap<(BlockType, u32), Entry>,
        node_type: BlockType,
        version: SchemaVersion,
    ) -> Option<&Entry> {
        match version {
            SchemaVersion::Exact(v) => entries.get(&(node_type, v)),
            SchemaVersion::Latest => entries
                .range((node_type, 0)..=(node_type, u32::MAX))
                .next_back()
                .map(|(_, e)| e),
        }
    }
}
