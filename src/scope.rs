//! Branch + namespace coordinates of an operation.
//!
//! Every repository call takes a `Scope`. The branch selects which line of
//! history of the backing store is read or committed to; the namespace
//! partitions blocks inside that branch. Reads only see the scope's
//! namespace unless the scope was widened with [`Scope::cross_namespace`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub branch: String,
    pub namespace: String,
    #[serde(default)]
    all_namespaces: bool,
}

impl Scope {
    pub fn new(branch: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { branch: branch.into(), namespace: namespace.into(), all_namespaces: false }
    }

    /// Default branch and namespace from `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.default_branch.clone(), config.default_namespace.clone())
    }

    /// Same namespace, different branch.
    pub fn on_branch(&self, branch: impl Into<String>) -> Self {
        Self { branch: branch.into(), ..self.clone() }
    }

    /// Same branch, different namespace.
    pub fn in_namespace(&self, namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), ..self.clone() }
    }

    /// Reads see every namespace. Writes still land in `namespace`.
    pub fn cross_namespace(mut self) -> Self {
        self.all_namespaces = true;
        self
    }

    /// Namespace to filter reads by, `None` when widened.
    pub fn namespace_filter(&self) -> Option<&str> {
        if self.all_namespaces { None } else { Some(&self.namespace) }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_namespaces {
            write!(f, "{}/*", self.branch)
        } else {
            write!(f, "{}/{}", self.branch, self.namespace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_filter() {
        let s = Scope::new("main", "team-a");
        assert_eq!(s.namespace_filter(), Some("team-a"));
        assert_eq!(s.to_string(), "main/team-a");

        let wide = s.clone().cross_namespace();
        assert_eq!(wide.namespace_filter(), None);
        assert_eq!(wide.namespace, "team-a");
        assert_eq!(wide.to_string(), "main/*");
    }

    #[test]
    fn test_from_config_and_rescoping() {
        let s = Scope::from_config(&StoreConfig::default());
        assert_eq!((s.branch.as_str(), s.namespace.as_str()), ("main", "default"));
        let f = s.on_branch("feature").in_namespace("ops");
        assert_eq!((f.branch.as_str(), f.namespace.as_str()), ("feature", "ops"));
    }
}
