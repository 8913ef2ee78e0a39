//! Read path: one block query, one property query, recompose in memory.

use hashbrown::HashMap;
use tracing::{debug, instrument};

use super::BlockStore;
use crate::model::{BlockId, BlockLink, BlockRow, BlockType, Direction, LinkRelation, MemoryBlock};
use crate::property::{mapper, Property, PropertyFilter};
use crate::schema::SchemaVersion;
use crate::scope::Scope;
use crate::storage::{BackingStore, BlockQuery, LinkQuery};
use crate::{Error, Result};

// ============================================================================
// Read types
// ============================================================================

/// Criteria for [`BlockStore::query_blocks`]. Everything set narrows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockFilter {
    pub block_type: Option<BlockType>,
    pub tags: Vec<String>,
    pub parent_id: Option<BlockId>,
    pub ids: Option<Vec<BlockId>>,
    pub properties: Vec<PropertyFilter>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Ignore the scope's namespace.
    pub all_namespaces: bool,
}

impl BlockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, block_type: BlockType) -> Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn child_of(mut self, parent: impl Into<BlockId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = BlockId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn where_property(mut self, filter: PropertyFilter) -> Self {
        self.properties.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn all_namespaces(mut self) -> Self {
        self.all_namespaces = true;
        self
    }

    fn to_query(&self, scope: &Scope) -> BlockQuery {
        let namespace = if self.all_namespaces { None } else { scope.namespace_filter() };
        BlockQuery {
            namespace: namespace.map(str::to_owned),
            ids: self.ids.clone(),
            block_type: self.block_type,
            tags: self.tags.clone(),
            parent_id: self.parent_id.clone(),
            property_filters: self.properties.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// A block together with every link touching it.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockWithLinks {
    pub block: MemoryBlock,
    /// Links whose source is the block, in display order.
    pub outgoing: Vec<BlockLink>,
    /// Links whose target is the block, in display order.
    pub incoming: Vec<BlockLink>,
}

/// A link and the block at its other end.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedBlock {
    pub link: BlockLink,
    pub block: MemoryBlock,
}

// ============================================================================
// Operations
// ============================================================================

impl<B: BackingStore> BlockStore<B> {
    #[instrument(skip_all, fields(scope = %scope, id = %id))]
    pub async fn get_block(&self, id: &BlockId, scope: &Scope) -> Result<MemoryBlock> {
        let query = BlockQuery::by_ids([id.clone()]).in_namespace(scope.namespace_filter());
        self.load(scope, &query)
            .await?
            .pop()
            .ok_or_else(|| Error::BlockNotFound(id.clone()))
    }

    /// Blocks for `ids` in the order asked for. Ids not visible in the
    /// scope are left out.
    #[instrument(skip_all, fields(scope = %scope, count = ids.len()))]
    pub async fn get_blocks(&self, ids: &[BlockId], scope: &Scope) -> Result<Vec<MemoryBlock>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = BlockQuery::by_ids(ids.iter().cloned()).in_namespace(scope.namespace_filter());
        let mut by_id: HashMap<BlockId, MemoryBlock> =
            self.load(scope, &query).await?.into_iter().map(|b| (b.id.clone(), b)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Every block of the scope, oldest first.
    pub async fn list_blocks(&self, scope: &Scope) -> Result<Vec<MemoryBlock>> {
        self.query_blocks(&BlockFilter::default(), scope).await
    }

    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn query_blocks(&self, filter: &BlockFilter, scope: &Scope) -> Result<Vec<MemoryBlock>> {
        self.load(scope, &filter.to_query(scope)).await
    }

    /// The block plus its outgoing and incoming links, at the cost of one
    /// extra link query.
    #[instrument(skip_all, fields(scope = %scope, id = %id))]
    pub async fn get_block_with_links(&self, id: &BlockId, scope: &Scope) -> Result<BlockWithLinks> {
        let block = self.get_block(id, scope).await?;
        let links = self
            .select_links(&scope.branch, &LinkQuery::touching([id.clone()], Direction::Both))
            .await?;
        let (mut outgoing, mut incoming): (Vec<_>, Vec<_>) = links.into_iter().partition(|l| l.from_id == *id);
        outgoing.sort_by(BlockLink::display_order);
        incoming.sort_by(BlockLink::display_order);
        Ok(BlockWithLinks { block, outgoing, incoming })
    }

    /// Blocks linked to `id`, by priority descending then age.
    ///
    /// Links whose other end is outside the scope's namespace are dropped.
    #[instrument(skip_all, fields(scope = %scope, id = %id, direction = ?direction))]
    pub async fn get_linked_blocks(
        &self,
        id: &BlockId,
        direction: Direction,
        relation: Option<LinkRelation>,
        scope: &Scope,
    ) -> Result<Vec<LinkedBlock>> {
        let origin = BlockQuery::by_ids([id.clone()]).in_namespace(scope.namespace_filter());
        if self.select_rows(&scope.branch, &origin).await?.is_empty() {
            return Err(Error::BlockNotFound(id.clone()));
        }

        let mut links = self
            .select_links(&scope.branch, &LinkQuery::touching([id.clone()], direction).with_relation(relation))
            .await?;
        if links.is_empty() {
            return Ok(Vec::new());
        }
        links.sort_by(BlockLink::display_order);

        let others: Vec<BlockId> = links.iter().filter_map(|l| l.other_block(id).cloned()).collect();
        let query = BlockQuery::by_ids(others).in_namespace(scope.namespace_filter());
        let blocks: HashMap<BlockId, MemoryBlock> =
            self.load(scope, &query).await?.into_iter().map(|b| (b.id.clone(), b)).collect();

        Ok(links
            .into_iter()
            .filter_map(|link| {
                let block = blocks.get(link.other_block(id)?)?.clone();
                Some(LinkedBlock { link, block })
            })
            .collect())
    }

    // ========================================================================
    // Batch load
    // ========================================================================

    /// Exactly two round trips however many blocks match.
    pub(crate) async fn load(&self, scope: &Scope, query: &BlockQuery) -> Result<Vec<MemoryBlock>> {
        let rows = self.select_rows(&scope.branch, query).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<BlockId> = rows.iter().map(|r| r.id.clone()).collect();
        let props = self.select_props(&scope.branch, &ids).await?;
        debug!(blocks = rows.len(), properties = props.len(), "batch loaded");
        self.assemble(rows, props)
    }

    pub(crate) fn assemble(&self, rows: Vec<BlockRow>, props: Vec<Property>) -> Result<Vec<MemoryBlock>> {
        let mut grouped: HashMap<BlockId, Vec<Property>> = HashMap::with_capacity(rows.len());
        for prop in props {
            grouped.entry(prop.block_id.clone()).or_default().push(prop);
        }
        rows.into_iter()
            .map(|row| {
                let props = grouped.remove(&row.id).unwrap_or_default();
                self.hydrate(row, &props)
            })
            .collect()
    }

    pub(crate) fn hydrate(&self, row: BlockRow, props: &[Property]) -> Result<MemoryBlock> {
        let mut metadata = mapper::compose(props)?;
        if let Some(version) = row.schema_version {
            metadata = self.registry.reconstruct(row.block_type, SchemaVersion::Exact(version), metadata);
        }
        Ok(MemoryBlock::from_row(row, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkOptions, NewBlock};
    use crate::property::FilterOp;
    use crate::{metadata, MetaValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn seeded() -> (BlockStore<crate::storage::MemoryStore>, Scope, Vec<BlockId>) {
        let store = BlockStore::open_memory().await.unwrap();
        let scope = store.default_scope();
        let mut ids = Vec::new();
        for (i, tag) in ["red", "blue", "red"].into_iter().enumerate() {
            let block = store
                .create_block(
                    NewBlock::new(BlockType::Task, format!("task {i}"))
                        .with_tags([tag])
                        .with_metadata(metadata! { "priority" => i as i64 }),
                    &scope,
                    None,
                )
                .await
                .unwrap();
            ids.push(block.id);
        }
        (store, scope, ids)
    }

    #[tokio::test]
    async fn test_get_block_missing() {
        let (store, scope, _) = seeded().await;
        let err = store.get_block(&"nope".into(), &scope).await.unwrap_err();
        assert!(matches!(err, Error::BlockNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_blocks_keeps_requested_order() {
        let (store, scope, ids) = seeded().await;
        let asked = vec![ids[2].clone(), BlockId::from("ghost"), ids[0].clone()];
        let got: Vec<_> = store.get_blocks(&asked, &scope).await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(got, vec![ids[2].clone(), ids[0].clone()]);
    }

    #[tokio::test]
    async fn test_query_by_tag_and_property() {
        let (store, scope, ids) = seeded().await;
        let red = store.query_blocks(&BlockFilter::new().with_tag("red"), &scope).await.unwrap();
        assert_eq!(red.len(), 2);

        let filter = BlockFilter::new()
            .with_tag("red")
            .where_property(PropertyFilter::new("priority", FilterOp::Gt(MetaValue::Int(0))));
        let hits = store.query_blocks(&filter, &scope).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[2]);

        let page = store.query_blocks(&BlockFilter::new().offset(1).limit(1), &scope).await.unwrap();
        assert_eq!(page[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_linked_blocks_sorted_and_scoped() {
        let (store, scope, ids) = seeded().await;
        store
            .create_link(&ids[0], &ids[1], LinkRelation::Blocks, LinkOptions::priority(1), &scope, None)
            .await
            .unwrap();
        store
            .create_link(&ids[0], &ids[2], LinkRelation::Mentions, LinkOptions::priority(9), &scope, None)
            .await
            .unwrap();

        let linked = store.get_linked_blocks(&ids[0], Direction::Outgoing, None, &scope).await.unwrap();
        let order: Vec<_> = linked.iter().map(|l| l.block.id.clone()).collect();
        assert_eq!(order, vec![ids[2].clone(), ids[1].clone()]);

        let blocks_only = store
            .get_linked_blocks(&ids[0], Direction::Outgoing, Some(LinkRelation::Blocks), &scope)
            .await
            .unwrap();
        assert_eq!(blocks_only.len(), 1);

        let incoming = store.get_linked_blocks(&ids[1], Direction::Incoming, None, &scope).await.unwrap();
        assert_eq!(incoming[0].block.id, ids[0]);

        let elsewhere = store.scope("other");
        assert!(store.get_linked_blocks(&ids[0], Direction::Both, None, &elsewhere).await.is_err());
    }

    #[tokio::test]
    async fn test_with_links_splits_directions() {
        let (store, scope, ids) = seeded().await;
        store
            .create_link(&ids[0], &ids[1], LinkRelation::DependsOn, LinkOptions::default(), &scope, None)
            .await
            .unwrap();
        store
            .create_link(&ids[2], &ids[0], LinkRelation::References, LinkOptions::default(), &scope, None)
            .await
            .unwrap();
        let view = store.get_block_with_links(&ids[0], &scope).await.unwrap();
        assert_eq!(view.outgoing.len(), 1);
        assert_eq!(view.incoming.len(), 1);
        assert_eq!(view.incoming[0].from_id, ids[2]);
    }

    #[tokio::test]
    async fn test_read_reconstructs_with_schema() {
        let store = BlockStore::open_memory().await.unwrap();
        let scope = store.default_scope();
        let doc = json!({"properties": {"status": {"type": "string", "enum": ["open", "closed"]}}});
        store.register_schema(BlockType::Bug, 1, doc, None).await.unwrap();
        let block = store
            .create_block(
                NewBlock::new(BlockType::Bug, "crash").with_schema_version(1).with_property("status", "open"),
                &scope,
                None,
            )
            .await
            .unwrap();
        let read = store.get_block(&block.id, &scope).await.unwrap();
        assert_eq!(read.metadata["status"], MetaValue::Select("open".into()));
    }
}
