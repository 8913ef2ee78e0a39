//! Namespace migration and the batch reporting shared by every bulk call.
//!
//! A batch is decided item by item first, then committed as a single
//! changeset. With `stop_on_first_error` nothing is committed once any item
//! fails; otherwise the items that passed are committed together.

use std::fmt;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::{reject_duplicates, BlockStore};
use crate::model::{BlockId, BlockLink, Direction};
use crate::scope::Scope;
use crate::storage::{BackingStore, BlockQuery, LinkQuery};
use crate::tx::{Changeset, CommitInfo, CommitMeta, Mutation};
use crate::{Error, Result};

/// An item label and either its mutations or the reason it was refused.
pub(crate) type ItemResult = (String, std::result::Result<Vec<Mutation>, String>);

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
    /// Not attempted because another item failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item: String,
    pub outcome: ItemOutcome,
}

/// Per-item outcome of a bulk call, plus the commit if one was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    pub commit: Option<CommitInfo>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    /// Outcome recorded for `item`.
    pub fn outcome(&self, item: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|r| r.item == item).map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| pred(&r.outcome)).count()
    }

    fn push(&mut self, item: String, outcome: ItemOutcome) {
        self.items.push(ItemReport { item, outcome });
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} items failed, {} skipped", self.failed(), self.len(), self.skipped())
    }
}

// ============================================================================
// Operations
// ============================================================================

impl<B: BackingStore> BlockStore<B> {
    /// Move blocks from the scope's namespace to `target_namespace`.
    ///
    /// Property rows follow their block. Outgoing links take the new
    /// namespace; children are not moved.
    ///
    /// Unless cross-namespace links are allowed, a block fails when one of
    /// its links would end up joining two namespaces: the partner neither
    /// moves in the same batch nor already lives in the target.
    #[instrument(skip_all, fields(scope = %scope, to = target_namespace, count = block_ids.len(), stop = stop_on_first_error))]
    pub async fn bulk_update_namespace(
        &self,
        block_ids: &[BlockId],
        target_namespace: &str,
        stop_on_first_error: bool,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<BatchReport> {
        self.check_batch_size(block_ids.len())?;
        reject_duplicates(block_ids)?;
        if target_namespace.trim().is_empty() {
            return Err(Error::ValidationError("target namespace must not be empty".into()));
        }
        if block_ids.is_empty() {
            return Ok(BatchReport::default());
        }

        let query = BlockQuery::by_ids(block_ids.iter().cloned()).in_namespace(scope.namespace_filter());
        let found: HashMap<BlockId, String> = self
            .select_rows(&scope.branch, &query)
            .await?
            .into_iter()
            .map(|r| (r.id, r.namespace))
            .collect();

        let stranded = if self.config.allow_cross_namespace_links {
            HashMap::new()
        } else {
            self.stranded_links(&scope.branch, &found, target_namespace).await?
        };

        let results: Vec<ItemResult> = block_ids
            .iter()
            .map(|id| {
                let outcome = match found.get(id) {
                    None => Err(format!("not found in namespace {}", scope.namespace)),
                    Some(current) if current == target_namespace => Ok(Vec::new()),
                    Some(_) if stranded.contains_key(id) => {
                        Err(format!("would strand {} cross-namespace link(s)", stranded[id]))
                    }
                    Some(_) => Ok(vec![Mutation::SetNamespace {
                        block_id: id.clone(),
                        namespace: target_namespace.to_owned(),
                    }]),
                };
                (id.to_string(), outcome)
            })
            .collect();

        let meta = self.meta(format!("move {} blocks to {target_namespace}", results.len()), author);
        self.finish_batch(&scope.branch, meta, results, stop_on_first_error).await
    }

    /// Links each moving block would leave joining two namespaces, per block.
    async fn stranded_links(
        &self,
        branch: &str,
        found: &HashMap<BlockId, String>,
        target_namespace: &str,
    ) -> Result<HashMap<BlockId, usize>> {
        let candidates: Vec<BlockId> = found
            .iter()
            .filter(|(_, ns)| *ns != target_namespace)
            .map(|(id, _)| id.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(HashMap::new());
        }
        let links = self.select_links(branch, &LinkQuery::touching(candidates.clone(), Direction::Both)).await?;

        let outside: Vec<BlockId> = links
            .iter()
            .flat_map(|l| [&l.from_id, &l.to_id])
            .filter(|id| !found.contains_key(*id))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut namespaces = found.clone();
        if !outside.is_empty() {
            let rows = self.select_rows(branch, &BlockQuery::by_ids(outside)).await?;
            namespaces.extend(rows.into_iter().map(|r| (r.id, r.namespace)));
        }
        Ok(strand_counts(candidates, &links, &namespaces, target_namespace))
    }

    /// Turn per-item decisions into a report and at most one commit.
    pub(crate) async fn finish_batch(
        &self,
        branch: &str,
        meta: CommitMeta,
        results: Vec<ItemResult>,
        stop_on_first_error: bool,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        if stop_on_first_error && results.iter().any(|(_, r)| r.is_err()) {
            let mut failed = false;
            for (item, result) in results {
                match result {
                    Err(reason) if !failed => {
                        failed = true;
                        report.push(item, ItemOutcome::Failed(reason));
                    }
                    _ => report.push(item, ItemOutcome::Skipped),
                }
            }
            warn!(branch, %report, "batch aborted, nothing committed");
            return Err(Error::BatchPartialFailure(report));
        }

        let mut changeset = Changeset::new(meta);
        for (item, result) in results {
            match result {
                Ok(mutations) => {
                    changeset.extend(mutations);
                    report.push(item, ItemOutcome::Succeeded);
                }
                Err(reason) => report.push(item, ItemOutcome::Failed(reason)),
            }
        }
        if !changeset.is_empty() {
            report.commit = Some(self.commit(branch, changeset).await?);
        }

        if report.failed() > 0 {
            warn!(branch, %report, "batch partially failed");
            return Err(Error::BatchPartialFailure(report));
        }
        Ok(report)
    }
}

/// Settle which candidates cannot move. A refused block stays where it is,
/// which can strand the links of a partner that was counting on it, so
/// repeat until nothing changes.
fn strand_counts(
    candidates: Vec<BlockId>,
    links: &[BlockLink],
    namespaces: &HashMap<BlockId, String>,
    target_namespace: &str,
) -> HashMap<BlockId, usize> {
    let mut moving: HashSet<BlockId> = candidates.into_iter().collect();
    let mut refused = HashMap::new();
    loop {
        let mut counts: HashMap<BlockId, usize> = HashMap::new();
        for link in links {
            for (end, other) in [(&link.from_id, &link.to_id), (&link.to_id, &link.from_id)] {
                let other_lands = moving.contains(other)
                    || namespaces.get(other).is_some_and(|ns| ns == target_namespace);
                if moving.contains(end) && !other_lands {
                    *counts.entry(end.clone()).or_default() += 1;
                }
            }
        }
        if counts.is_empty() {
            return refused;
        }
        for (id, n) in counts {
            moving.remove(&id);
            refused.insert(id, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::{BlockType, LinkOptions, LinkRelation, NewBlock};
    use crate::storage::MemoryStore;
    use crate::BlockFilter;
    use pretty_assertions::assert_eq;

    async fn with_blocks(n: usize) -> (BlockStore<MemoryStore>, Scope, Vec<BlockId>) {
        let store = BlockStore::open_memory().await.unwrap();
        let scope = store.default_scope();
        let mut ids = Vec::new();
        for i in 0..n {
            let b = store
                .create_block(NewBlock::new(BlockType::Task, format!("t{i}")).with_property("n", i as i64), &scope, None)
                .await
                .unwrap();
            ids.push(b.id);
        }
        (store, scope, ids)
    }

    #[test]
    fn test_report_counts_and_display() {
        let mut report = BatchReport::default();
        report.push("a".into(), ItemOutcome::Succeeded);
        report.push("b".into(), ItemOutcome::Failed("nope".into()));
        report.push("c".into(), ItemOutcome::Skipped);
        assert_eq!((report.succeeded(), report.failed(), report.skipped()), (1, 1, 1));
        assert_eq!(report.outcome("b"), Some(&ItemOutcome::Failed("nope".into())));
        assert_eq!(report.to_string(), "1 of 3 items failed, 1 skipped");
    }

    #[tokio::test]
    async fn test_move_all() {
        let (store, scope, ids) = with_blocks(3).await;
        let report = store.bulk_update_namespace(&ids, "archive", true, &scope, None).await.unwrap();
        assert_eq!(report.succeeded(), 3);
        assert!(report.commit.is_some());

        assert!(store.list_blocks(&scope).await.unwrap().is_empty());
        let moved = store.list_blocks(&store.scope("archive")).await.unwrap();
        assert_eq!(moved.len(), 3);
        assert_eq!(moved[1].metadata["n"], crate::MetaValue::Int(1));
    }

    #[tokio::test]
    async fn test_stop_on_first_error_commits_nothing() {
        let (store, scope, mut ids) = with_blocks(2).await;
        ids.insert(1, BlockId::from("ghost"));
        let Err(Error::BatchPartialFailure(report)) =
            store.bulk_update_namespace(&ids, "archive", true, &scope, None).await
        else {
            panic!("expected a partial failure");
        };
        assert_eq!(report.outcome(ids[0].as_str()), Some(&ItemOutcome::Skipped));
        assert!(matches!(report.outcome("ghost"), Some(ItemOutcome::Failed(_))));
        assert_eq!(report.outcome(ids[2].as_str()), Some(&ItemOutcome::Skipped));
        assert_eq!(store.list_blocks(&scope).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_best_effort_commits_valid_items() {
        let (store, scope, mut ids) = with_blocks(2).await;
        ids.push(BlockId::from("ghost"));
        let Err(Error::BatchPartialFailure(report)) =
            store.bulk_update_namespace(&ids, "archive", false, &scope, None).await
        else {
            panic!("expected a partial failure");
        };
        assert_eq!((report.succeeded(), report.failed()), (2, 1));
        assert_eq!(store.list_blocks(&store.scope("archive")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_bounds() {
        let store = BlockStore::open_memory_with(StoreConfig::default().with_max_batch_size(2)).await.unwrap();
        let scope = store.default_scope();
        let ids: Vec<BlockId> = ["a", "b", "c"].into_iter().map(BlockId::from).collect();
        let err = store.bulk_update_namespace(&ids, "x", false, &scope, None).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        let dup = [BlockId::from("a"), BlockId::from("a")];
        let err = store.bulk_update_namespace(&dup, "x", false, &scope, None).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        let err = store.bulk_update_namespace(&dup[..1], " ", false, &scope, None).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_move_refused_when_link_partner_stays() {
        let (store, scope, ids) = with_blocks(2).await;
        store
            .create_link(&ids[0], &ids[1], LinkRelation::Blocks, LinkOptions::default(), &scope, None)
            .await
            .unwrap();

        let Err(Error::BatchPartialFailure(report)) =
            store.bulk_update_namespace(&ids[..1], "archive", true, &scope, None).await
        else {
            panic!("expected a partial failure");
        };
        assert_eq!(
            report.outcome(ids[0].as_str()),
            Some(&ItemOutcome::Failed("would strand 1 cross-namespace link(s)".into()))
        );
        assert!(report.commit.is_none());
        let linked = store.get_linked_blocks(&ids[0], Direction::Outgoing, None, &scope).await.unwrap();
        assert_eq!(linked.len(), 1);
    }

    #[tokio::test]
    async fn test_linked_blocks_move_together() {
        let (store, scope, ids) = with_blocks(2).await;
        store
            .create_link(&ids[0], &ids[1], LinkRelation::Blocks, LinkOptions::default(), &scope, None)
            .await
            .unwrap();
        store.bulk_update_namespace(&ids, "archive", true, &scope, None).await.unwrap();

        let archive = store.scope("archive");
        let view = store.get_block_with_links(&ids[0], &archive).await.unwrap();
        assert_eq!(view.outgoing[0].namespace, "archive");
        let linked = store.get_linked_blocks(&ids[0], Direction::Outgoing, None, &archive).await.unwrap();
        assert_eq!(linked[0].block.id, ids[1]);
    }

    #[tokio::test]
    async fn test_refusal_spreads_to_batch_partners() {
        // 0 -> 1 -> 2, moving 0 and 1 only: 1 is held back by 2, then 0 by 1.
        let (store, scope, ids) = with_blocks(3).await;
        for pair in ids.windows(2) {
            store
                .create_link(&pair[0], &pair[1], LinkRelation::DependsOn, LinkOptions::default(), &scope, None)
                .await
                .unwrap();
        }
        let Err(Error::BatchPartialFailure(report)) =
            store.bulk_update_namespace(&ids[..2], "archive", false, &scope, None).await
        else {
            panic!("expected a partial failure");
        };
        assert_eq!(report.failed(), 2);
        assert!(report.commit.is_none());
        assert_eq!(store.list_blocks(&scope).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cross_namespace_config_allows_split() {
        let store = BlockStore::open_memory_with(StoreConfig::default().with_cross_namespace_links(true))
            .await
            .unwrap();
        let scope = store.default_scope();
        let a = store.create_block(NewBlock::new(BlockType::Task, "a"), &scope, None).await.unwrap();
        let b = store.create_block(NewBlock::new(BlockType::Task, "b"), &scope, None).await.unwrap();
        store
            .create_link(&a.id, &b.id, LinkRelation::Mentions, LinkOptions::default(), &scope, None)
            .await
            .unwrap();

        store.bulk_update_namespace(&[a.id.clone()], "archive", true, &scope, None).await.unwrap();
        let everywhere = store
            .query_blocks(&BlockFilter::new().all_namespaces(), &scope)
            .await
            .unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn test_already_in_target_is_success_without_commit() {
        let (store, scope, ids) = with_blocks(1).await;
        let report = store.bulk_update_namespace(&ids, "default", false, &scope, None).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert!(report.commit.is_none());
    }
}
