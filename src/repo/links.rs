//! Link Graph writes.
//!
//! Endpoints must exist when a link is written. Unless the store allows
//! cross-namespace links, both ends must also share a namespace; the link
//! takes the namespace of its source.

use chrono::Utc;
use hashbrown::{HashMap, HashSet};
use tracing::instrument;

use super::namespace::ItemResult;
use super::{reject_duplicates, BatchReport, BlockStore};
use crate::model::{BlockId, BlockLink, BlockRow, LinkKey, LinkOptions, LinkRelation, LinkSpec};
use crate::scope::Scope;
use crate::storage::{BackingStore, BlockQuery, LinkQuery};
use crate::tx::{Changeset, Mutation};
use crate::{Error, Result};

impl<B: BackingStore> BlockStore<B> {
    #[instrument(skip_all, fields(scope = %scope, from = %from, to = %to, relation = %relation))]
    pub async fn create_link(
        &self,
        from: &BlockId,
        to: &BlockId,
        relation: LinkRelation,
        options: LinkOptions,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<BlockLink> {
        let key = LinkKey::new(from.clone(), to.clone(), relation);
        if key.from_id == key.to_id {
            return Err(Error::ValidationError(format!("block {from} cannot link to itself")));
        }
        let rows = self.endpoint_rows([from, to], scope).await?;
        if !self.select_links(&scope.branch, &LinkQuery::keys([key.clone()])).await?.is_empty() {
            return Err(Error::ValidationError(format!("link {key} already exists")));
        }
        let link = self.check_link(key, options, author, &rows).map_err(|reason| reason.into_error())?;

        let changeset = Changeset::new(self.meta(format!("link {}", link.key()), author))
            .with(Mutation::InsertLink(link.clone()));
        self.commit(&scope.branch, changeset).await?;
        Ok(link)
    }

    #[instrument(skip_all, fields(scope = %scope, from = %from, to = %to, relation = %relation))]
    pub async fn delete_link(
        &self,
        from: &BlockId,
        to: &BlockId,
        relation: LinkRelation,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<()> {
        let key = LinkKey::new(from.clone(), to.clone(), relation);
        let query = LinkQuery::keys([key.clone()]).in_namespace(scope.namespace_filter());
        if self.select_links(&scope.branch, &query).await?.is_empty() {
            return Err(Error::ValidationError(format!("no link {key}")));
        }
        let changeset = Changeset::new(self.meta(format!("unlink {key}"), author)).with(Mutation::DeleteLink(key));
        self.commit(&scope.branch, changeset).await?;
        Ok(())
    }

    /// Create many links with one endpoint query, one link query and at
    /// most one commit.
    #[instrument(skip_all, fields(scope = %scope, count = specs.len(), stop = stop_on_first_error))]
    pub async fn bulk_create_links(
        &self,
        specs: Vec<LinkSpec>,
        stop_on_first_error: bool,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<BatchReport> {
        self.check_batch_size(specs.len())?;
        reject_duplicates(specs.iter().map(|s| &s.key))?;
        if specs.is_empty() {
            return Ok(BatchReport::default());
        }

        let ids: Vec<&BlockId> = specs.iter().flat_map(|s| [&s.key.from_id, &s.key.to_id]).collect();
        let rows = self.endpoint_rows(ids, scope).await?;
        let existing: HashSet<LinkKey> = self
            .select_links(&scope.branch, &LinkQuery::keys(specs.iter().map(|s| s.key.clone())))
            .await?
            .into_iter()
            .map(|l| l.key())
            .collect();

        let results: Vec<ItemResult> = specs
            .into_iter()
            .map(|spec| {
                let item = spec.key.to_string();
                let outcome = if spec.key.from_id == spec.key.to_id {
                    Err("a block cannot link to itself".to_owned())
                } else if existing.contains(&spec.key) {
                    Err("link already exists".to_owned())
                } else {
                    self.check_link(spec.key, spec.options, author, &rows)
                        .map(|link| vec![Mutation::InsertLink(link)])
                        .map_err(|reason| reason.to_string())
                };
                (item, outcome)
            })
            .collect();

        let message = format!("link {} pairs", results.len());
        self.finish_batch(&scope.branch, self.meta(message, author), results, stop_on_first_error)
            .await
    }

    /// Delete many links, reporting keys that do not exist as failures.
    #[instrument(skip_all, fields(scope = %scope, count = keys.len(), stop = stop_on_first_error))]
    pub async fn bulk_delete_links(
        &self,
        keys: Vec<LinkKey>,
        stop_on_first_error: bool,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<BatchReport> {
        self.check_batch_size(keys.len())?;
        reject_duplicates(&keys)?;
        if keys.is_empty() {
            return Ok(BatchReport::default());
        }

        let query = LinkQuery::keys(keys.iter().cloned()).in_namespace(scope.namespace_filter());
        let existing: HashSet<LinkKey> =
            self.select_links(&scope.branch, &query).await?.into_iter().map(|l| l.key()).collect();

        let results: Vec<ItemResult> = keys
            .into_iter()
            .map(|key| {
                let item = key.to_string();
                let outcome = if existing.contains(&key) {
                    Ok(vec![Mutation::DeleteLink(key)])
                } else {
                    Err("no such link".to_owned())
                };
                (item, outcome)
            })
            .collect();

        let message = format!("unlink {} pairs", results.len());
        self.finish_batch(&scope.branch, self.meta(message, author), results, stop_on_first_error)
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Rows of the given endpoints visible for linking, keyed by id.
    async fn endpoint_rows<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a BlockId>,
        scope: &Scope,
    ) -> Result<HashMap<BlockId, BlockRow>> {
        let namespace = if self.config.allow_cross_namespace_links { None } else { scope.namespace_filter() };
        let unique: HashSet<&BlockId> = ids.into_iter().collect();
        let query = BlockQuery::by_ids(unique.into_iter().cloned()).in_namespace(namespace);
        Ok(self
            .select_rows(&scope.branch, &query)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect())
    }

    fn check_link(
        &self,
        key: LinkKey,
        options: LinkOptions,
        author: Option<&str>,
        rows: &HashMap<BlockId, BlockRow>,
    ) -> std::result::Result<BlockLink, LinkRejection> {
        let source = rows.get(&key.from_id).ok_or_else(|| LinkRejection::Unknown(key.from_id.clone()))?;
        let target = rows.get(&key.to_id).ok_or_else(|| LinkRejection::Unknown(key.to_id.clone()))?;
        if !self.config.allow_cross_namespace_links && source.namespace != target.namespace {
            return Err(LinkRejection::CrossNamespace {
                from: source.namespace.clone(),
                to: target.namespace.clone(),
            });
        }
        Ok(BlockLink {
            from_id: key.from_id,
            to_id: key.to_id,
            relation: key.relation,
            priority: options.priority,
            link_metadata: options.link_metadata,
            created_by: options.created_by.or_else(|| author.map(str::to_owned)),
            namespace: source.namespace.clone(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug)]
enum LinkRejection {
    Unknown(BlockId),
    CrossNamespace { from: String, to: String },
}

impl LinkRejection {
    fn into_error(self) -> Error {
        match self {
            LinkRejection::Unknown(id) => Error::UnknownBlock(id),
            other => Error::ValidationError(other.to_string()),
        }
    }
}

impl std::fmt::Display for LinkRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkRejection::Unknown(id) => write!(f, "unknown block {id}"),
            LinkRejection::CrossNamespace { from, to } => {
                write!(f, "links between namespaces {from} and {to} are not allowed")
            }
        }
    }
}
