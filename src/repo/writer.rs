//! Write path: validate, decompose, diff, commit one changeset.

use chrono::Utc;
use tracing::{debug, instrument};

use super::diff::diff_properties;
use super::BlockStore;
use crate::model::{BlockId, BlockPatch, BlockRow, BlockType, Direction, MemoryBlock, MetaValue, Metadata, NewBlock};
use crate::property::{mapper, Property};
use crate::schema::SchemaVersion;
use crate::scope::Scope;
use crate::storage::{BackingStore, BlockQuery, LinkQuery};
use crate::tx::{BlockChanges, Changeset, CommitMeta, Mutation};
use crate::{Error, Result};

impl<B: BackingStore> BlockStore<B> {
    /// Persist a new block and its property rows as one commit.
    ///
    /// `Null` metadata values are dropped. A parent must exist in the
    /// scope's namespace.
    #[instrument(skip_all, fields(scope = %scope, block_type = %new.block_type))]
    pub async fn create_block(&self, new: NewBlock, scope: &Scope, author: Option<&str>) -> Result<MemoryBlock> {
        self.check_tags(&new.tags)?;
        let id = new.id.unwrap_or_else(BlockId::generate);
        if new.parent_id.as_ref() == Some(&id) {
            return Err(Error::ValidationError(format!("block {id} cannot be its own parent")));
        }

        let schema_version = self.pin_version(new.block_type, new.schema_version)?;
        let metadata = self.normalize(new.block_type, schema_version, new.metadata)?;
        if let Some(parent) = &new.parent_id {
            self.require_parent(parent, &scope.namespace, scope).await?;
        }

        let props = mapper::decompose_with(&id, &metadata, &new.computed_keys)?;
        let now = Utc::now();
        let row = BlockRow {
            id: id.clone(),
            namespace: scope.namespace.clone(),
            block_type: new.block_type,
            schema_version,
            text: new.text,
            state: new.state,
            visibility: new.visibility,
            block_version: new.block_version,
            parent_id: new.parent_id,
            has_children: false,
            tags: new.tags,
            embedding: new.embedding,
            created_at: now,
            updated_at: now,
        };

        let mut changeset = Changeset::new(self.meta(format!("create {} {id}", row.block_type), author))
            .with(Mutation::InsertBlock(row.clone()));
        changeset.extend(props.iter().cloned().map(Mutation::UpsertProperty));
        if let Some(parent) = &row.parent_id {
            changeset.push(Mutation::RefreshHasChildren(parent.clone()));
        }
        self.commit(&scope.branch, changeset).await?;

        Ok(MemoryBlock::from_row(row, mapper::compose(&props)?))
    }

    /// Apply a patch. Only changed property rows are written; a patch that
    /// changes nothing commits nothing.
    #[instrument(skip_all, fields(scope = %scope, id = %id))]
    pub async fn update_block(
        &self,
        id: &BlockId,
        patch: BlockPatch,
        scope: &Scope,
        author: Option<&str>,
    ) -> Result<MemoryBlock> {
        let (old_row, old_props) = self.fetch_one(id, scope).await?;

        let mut row = old_row.clone();
        if let Some(text) = patch.text {
            row.text = text;
        }
        if let Some(tags) = patch.tags {
            self.check_tags(&tags)?;
            row.tags = tags;
        }
        if let Some(state) = patch.state {
            row.state = state;
        }
        if let Some(visibility) = patch.visibility {
            row.visibility = visibility;
        }
        if let Some(block_version) = patch.block_version {
            row.block_version = block_version;
        }
        if let Some(embedding) = patch.embedding {
            row.embedding = embedding;
        }
        if let Some(parent) = patch.parent_id {
            if parent.as_ref() == Some(id) {
                return Err(Error::ValidationError(format!("block {id} cannot be its own parent")));
            }
            if parent != old_row.parent_id {
                if let Some(p) = &parent {
                    self.require_parent(p, &old_row.namespace, scope).await?;
                }
            }
            row.parent_id = parent;
        }
        let requested = patch.schema_version.unwrap_or(old_row.schema_version);
        row.schema_version = self.pin_version(row.block_type, requested)?;

        let mut merged = mapper::compose(&old_props)?;
        for (key, value) in patch.metadata.iter() {
            if value.is_null() {
                merged.shift_remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        let merged = self.normalize(row.block_type, row.schema_version, merged)?;

        // Keys the patch leaves alone keep their computed flag.
        let mut computed = patch.computed_keys;
        computed.extend(
            old_props
                .iter()
                .filter(|p| p.is_computed && !patch.metadata.contains_key(&p.name))
                .map(|p| p.name.clone()),
        );
        let new_props = mapper::decompose_with(id, &merged, &computed)?;
        let diff = diff_properties(&old_props, &new_props);

        row.updated_at = Utc::now();
        let changes = BlockChanges::between(&old_row, &row, row.updated_at);
        if changes.is_empty() && diff.is_empty() {
            debug!("patch changes nothing");
            return self.hydrate(old_row, &old_props);
        }

        let parent_moved = changes.parent_id.is_some();
        let mut changeset = Changeset::new(self.meta(format!("update {} {id}", row.block_type), author))
            .with(Mutation::UpdateBlock { id: id.clone(), changes });
        changeset.extend(diff.into_mutations(id));
        if parent_moved {
            changeset.extend(
                [old_row.parent_id.clone(), row.parent_id.clone()]
                    .into_iter()
                    .flatten()
                    .map(Mutation::RefreshHasChildren),
            );
        }
        self.commit(&scope.branch, changeset).await?;

        Ok(MemoryBlock::from_row(row, mapper::compose(&new_props)?))
    }

    /// Remove a block with its property rows and every link touching it.
    ///
    /// With `validate_dependencies`, a block that still has children or
    /// incoming links is refused. Otherwise children keep their `parent_id`.
    #[instrument(skip_all, fields(scope = %scope, id = %id, validate = validate_dependencies))]
    pub async fn delete_block(
        &self,
        id: &BlockId,
        scope: &Scope,
        validate_dependencies: bool,
        author: Option<&str>,
    ) -> Result<()> {
        let query = BlockQuery::by_ids([id.clone()]).in_namespace(scope.namespace_filter());
        let row = self
            .select_rows(&scope.branch, &query)
            .await?
            .pop()
            .ok_or_else(|| Error::BlockNotFound(id.clone()))?;

        if validate_dependencies {
            if row.has_children {
                return Err(Error::ValidationError(format!("block {id} still has children")));
            }
            let incoming = self
                .select_links(&scope.branch, &LinkQuery::touching([id.clone()], Direction::Incoming))
                .await?;
            if !incoming.is_empty() {
                return Err(Error::ValidationError(format!(
                    "block {id} is the target of {} link(s)",
                    incoming.len()
                )));
            }
        }

        let mut changeset = Changeset::new(self.meta(format!("delete {} {id}", row.block_type), author))
            .with(Mutation::DeleteLinksFor(id.clone()))
            .with(Mutation::DeleteProperties(id.clone()))
            .with(Mutation::DeleteBlock(id.clone()));
        if let Some(parent) = row.parent_id {
            changeset.push(Mutation::RefreshHasChildren(parent));
        }
        self.commit(&scope.branch, changeset).await?;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub(crate) fn meta(&self, message: String, author: Option<&str>) -> CommitMeta {
        CommitMeta::new(message).by(author)
    }

    /// The version to store: the requested one if registered, else the
    /// latest when schemas are required, else none.
    fn pin_version(&self, block_type: BlockType, requested: Option<u32>) -> Result<Option<u32>> {
        match requested {
            Some(v) => self.registry.resolve(block_type, SchemaVersion::Exact(v)).map(|r| Some(r.version)),
            None if self.config.require_schema => self
                .registry
                .latest_version(block_type)
                .map(Some)
                .ok_or(Error::SchemaNotFound { node_type: block_type, version: SchemaVersion::Latest }),
            None => Ok(None),
        }
    }

    /// Validate, then retype and drop nulls.
    fn normalize(&self, block_type: BlockType, version: Option<u32>, metadata: Metadata) -> Result<Metadata> {
        let metadata = match version {
            Some(v) => {
                self.registry.validate(block_type, SchemaVersion::Exact(v), &metadata)?;
                self.registry.reconstruct(block_type, SchemaVersion::Exact(v), metadata)
            }
            None => metadata,
        };
        Ok(metadata.into_iter().filter(|(_, v)| !matches!(v, MetaValue::Null)).collect())
    }

    fn check_tags(&self, tags: &[String]) -> Result<()> {
        let max = self.config.max_tags;
        if tags.len() > max {
            return Err(Error::ValidationError(format!("{} tags given, at most {max} allowed", tags.len())));
        }
        if tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::ValidationError("tags must not be blank".into()));
        }
        Ok(())
    }

    async fn require_parent(&self, parent: &BlockId, namespace: &str, scope: &Scope) -> Result<()> {
        let query = BlockQuery::by_ids([parent.clone()]).in_namespace(Some(namespace));
        if self.select_rows(&scope.branch, &query).await?.is_empty() {
            return Err(Error::UnknownBlock(parent.clone()));
        }
        Ok(())
    }

    async fn fetch_one(&self, id: &BlockId, scope: &Scope) -> Result<(BlockRow, Vec<Property>)> {
        let query = BlockQuery::by_ids([id.clone()]).in_namespace(scope.namespace_filter());
        let row = self
            .select_rows(&scope.branch, &query)
            .await?
            .pop()
            .ok_or_else(|| Error::BlockNotFound(id.clone()))?;
        let props = self.select_props(&scope.branch, std::slice::from_ref(id)).await?;
        Ok((row, props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::metadata;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store() -> (BlockStore<MemoryStore>, Scope) {
        let store = BlockStore::open_memory().await.unwrap();
        let scope = store.default_scope();
        (store, scope)
    }

    fn block_count(store: &BlockStore<MemoryStore>) -> usize {
        store.backend().counts("main").map_or(0, |c| c.blocks)
    }

    #[tokio::test]
    async fn test_create_drops_nulls_and_round_trips() {
        let (store, scope) = store().await;
        let block = store
            .create_block(
                NewBlock::new(BlockType::Knowledge, "fact")
                    .with_metadata(metadata! { "a" => 1, "gone" => MetaValue::Null, "ok" => true }),
                &scope,
                Some("ada"),
            )
            .await
            .unwrap();
        assert_eq!(block.metadata, metadata! { "a" => 1, "ok" => true });
        assert_eq!(store.get_block(&block.id, &scope).await.unwrap().metadata, block.metadata);
        assert_eq!(block_count(&store), 1);

        let log = store.log("main", 1).await.unwrap();
        assert_eq!(log[0].author.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn test_create_validation_writes_nothing() {
        let (store, scope) = store().await;
        store
            .register_schema(BlockType::Task, 1, json!({"required": ["status"]}), None)
            .await
            .unwrap();
        let err = store
            .create_block(NewBlock::new(BlockType::Task, "t").with_schema_version(1), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        let err = store
            .create_block(NewBlock::new(BlockType::Task, "t").with_schema_version(7), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { .. }));
        assert_eq!(block_count(&store), 0);
    }

    #[tokio::test]
    async fn test_required_schema_pins_latest() {
        let store = BlockStore::open_memory_with(StoreConfig::default().with_required_schema(true)).await.unwrap();
        let scope = store.default_scope();
        let err = store.create_block(NewBlock::new(BlockType::Log, "x"), &scope, None).await.unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { version: SchemaVersion::Latest, .. }));

        store.register_schema(BlockType::Log, 1, json!({}), None).await.unwrap();
        store.register_schema(BlockType::Log, 2, json!({}), None).await.unwrap();
        let block = store.create_block(NewBlock::new(BlockType::Log, "x"), &scope, None).await.unwrap();
        assert_eq!(block.schema_version, Some(2));
    }

    #[tokio::test]
    async fn test_parent_must_exist_and_flags_children() {
        let (store, scope) = store().await;
        let err = store
            .create_block(NewBlock::new(BlockType::Task, "orphan").with_parent("ghost".into()), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownBlock(_)));

        let parent = store.create_block(NewBlock::new(BlockType::Epic, "epic"), &scope, None).await.unwrap();
        let child = store
            .create_block(NewBlock::new(BlockType::Task, "child").with_parent(parent.id.clone()), &scope, None)
            .await
            .unwrap();
        assert!(store.get_block(&parent.id, &scope).await.unwrap().has_children);

        store
            .update_block(&child.id, BlockPatch::default().with_parent(None), &scope, None)
            .await
            .unwrap();
        assert!(!store.get_block(&parent.id, &scope).await.unwrap().has_children);
    }

    #[tokio::test]
    async fn test_update_patch_semantics() {
        let (store, scope) = store().await;
        let block = store
            .create_block(
                NewBlock::new(BlockType::Task, "t").with_metadata(metadata! { "a" => 1, "b" => "x", "c" => true }),
                &scope,
                None,
            )
            .await
            .unwrap();
        let updated = store
            .update_block(&block.id, BlockPatch::default().set("b", "y").unset("c").set("d", 2.5), &scope, None)
            .await
            .unwrap();
        assert_eq!(updated.metadata, metadata! { "a" => 1, "b" => "y", "d" => 2.5 });
        assert!(updated.updated_at >= block.updated_at);
        assert_eq!(store.get_block(&block.id, &scope).await.unwrap().metadata, updated.metadata);
    }

    #[tokio::test]
    async fn test_noop_update_commits_nothing() {
        let (store, scope) = store().await;
        let block = store
            .create_block(NewBlock::new(BlockType::Task, "t").with_property("a", 1), &scope, None)
            .await
            .unwrap();
        let before = store.log("main", 10).await.unwrap().len();
        let same = store
            .update_block(&block.id, BlockPatch::default().set("a", 1).with_text("t"), &scope, None)
            .await
            .unwrap();
        assert_eq!(same.metadata, block.metadata);
        assert_eq!(store.log("main", 10).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_update_missing_block() {
        let (store, scope) = store().await;
        let err = store
            .update_block(&"nope".into(), BlockPatch::default().set("a", 1), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BlockNotFound(_)));
    }

    #[tokio::test]
    async fn test_tag_limit() {
        let store = BlockStore::open_memory_with(StoreConfig { max_tags: 2, ..StoreConfig::default() })
            .await
            .unwrap();
        let scope = store.default_scope();
        let err = store
            .create_block(NewBlock::new(BlockType::Doc, "d").with_tags(["a", "b", "c"]), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_delete_with_dependencies() {
        let (store, scope) = store().await;
        let parent = store.create_block(NewBlock::new(BlockType::Project, "p"), &scope, None).await.unwrap();
        let child = store
            .create_block(
                NewBlock::new(BlockType::Task, "c").with_parent(parent.id.clone()).with_property("n", 1),
                &scope,
                None,
            )
            .await
            .unwrap();

        let err = store.delete_block(&parent.id, &scope, true, None).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        store.delete_block(&child.id, &scope, true, None).await.unwrap();
        assert!(!store.get_block(&parent.id, &scope).await.unwrap().has_children);
        assert_eq!(store.backend().counts("main").unwrap().properties, 0);

        let err = store.delete_block(&child.id, &scope, false, None).await.unwrap_err();
        assert!(matches!(err, Error::BlockNotFound(_)));
    }

    #[tokio::test]
    async fn test_self_parent_rejected() {
        let (store, scope) = store().await;
        let id = BlockId::from("me");
        let err = store
            .create_block(NewBlock::new(BlockType::Task, "t").with_id(id.clone()).with_parent(id), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }
}
