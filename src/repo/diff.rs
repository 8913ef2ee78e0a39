//! Property diff between a block's stored rows and its updated rows.

use hashbrown::{HashMap, HashSet};

use crate::model::BlockId;
use crate::property::Property;
use crate::tx::Mutation;

/// Row-level difference. Untouched rows appear nowhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDiff {
    pub added: Vec<Property>,
    pub modified: Vec<Property>,
    pub removed: Vec<String>,
}

impl PropertyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Deletes, then in-place modifications, then appended rows.
    pub fn into_mutations(self, block_id: &BlockId) -> Vec<Mutation> {
        let deletes = self.removed.into_iter().map(|name| Mutation::DeleteProperty {
            block_id: block_id.clone(),
            name,
        });
        let upserts = self.modified.into_iter().chain(self.added).map(Mutation::UpsertProperty);
        deletes.chain(upserts).collect()
    }
}

/// Compare by name. A row whose type, value or computed flag changed is
/// modified and keeps its original `created_at`.
pub fn diff_properties(old: &[Property], new: &[Property]) -> PropertyDiff {
    let old_by_name: HashMap<&str, &Property> = old.iter().map(|p| (p.name.as_str(), p)).collect();
    let new_names: HashSet<&str> = new.iter().map(|p| p.name.as_str()).collect();

    let mut diff = PropertyDiff::default();
    for prop in new {
        match old_by_name.get(prop.name.as_str()) {
            None => diff.added.push(prop.clone()),
            Some(prev) if !prev.same_content(prop) => {
                let mut changed = prop.clone();
                changed.created_at = prev.created_at;
                diff.modified.push(changed);
            }
            Some(_) => {}
        }
    }
    diff.removed = old
        .iter()
        .filter(|p| !new_names.contains(p.name.as_str()))
        .map(|p| p.name.clone())
        .collect();
    diff
}
