//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tuning knobs for a [`BlockStore`](crate::BlockStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on ids per batch call. Larger requests are rejected.
    pub max_batch_size: usize,
    pub max_tags: usize,
    /// Permit links whose endpoints live in different namespaces.
    pub allow_cross_namespace_links: bool,
    /// Retries after a transient persistence failure. At most 1.
    pub persistence_retries: u32,
    pub default_branch: String,
    pub default_namespace: String,
    /// Pin the latest schema of the block type when a write names none.
    pub require_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            max_tags: 20,
            allow_cross_namespace_links: false,
            persistence_retries: 1,
            default_branch: "main".into(),
            default_namespace: "default".into(),
            require_schema: false,
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_json::from_str(s).map_err(|e| Error::Config(format!("malformed store config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be at least 1".into()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(Error::Config("default_branch must not be empty".into()));
        }
        if self.default_namespace.trim().is_empty() {
            return Err(Error::Config("default_namespace must not be empty".into()));
        }
        Ok(())
    }

    /// Retry budget actually applied: a transient failure is retried once.
    pub fn retries(&self) -> u32 {
        self.persistence_retries.min(1)
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }

    pub fn with_cross_namespace_links(mut self, allow: bool) -> Self {
        self.allow_cross_namespace_links = allow;
        self
    }

    pub fn with_required_schema(mut self, require: bool) -> Self {
        self.require_schema = require;
        self
    }
}
