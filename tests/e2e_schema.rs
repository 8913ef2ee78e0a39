//! End-to-end tests for schemas, branches and the SQL dump.

use memblock::storage::sql;
use memblock::{
    BackingStore, BlockPatch, BlockStore, BlockType, Changeset, CommitMeta, Error, MemoryStore, MetaValue, Mutation,
    NewBlock, Registered, SchemaRecord, SchemaVersion, StoreConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn task_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "status": {"type": "string", "enum": ["todo", "doing", "done"]},
            "estimate": {"type": "integer"},
            "due": {"type": "string", "format": "date"}
        },
        "required": ["status"],
        "additionalProperties": false
    })
}

// ============================================================================
// 1. Validation and typed reconstruction
// ============================================================================

#[tokio::test]
async fn test_schema_validates_and_retypes() {
    let store = BlockStore::open_memory().await.unwrap();
    let scope = store.default_scope();
    assert_eq!(
        store.register_schema(BlockType::Task, 1, task_schema(), None).await.unwrap(),
        Registered::Added
    );

    let bad = store
        .create_block(
            NewBlock::new(BlockType::Task, "t").with_schema_version(1).with_property("status", "lost"),
            &scope,
            None,
        )
        .await;
    assert!(matches!(bad, Err(Error::ValidationError(_))));

    let block = store
        .create_block(
            NewBlock::new(BlockType::Task, "t")
                .with_schema_version(1)
                .with_property("status", "todo")
                .with_property("estimate", 3.0)
                .with_property("due", "2024-05-01"),
            &scope,
            None,
        )
        .await
        .unwrap();
    let read = store.get_block(&block.id, &scope).await.unwrap();
    assert_eq!(read.metadata["status"], MetaValue::Select("todo".into()));
    assert_eq!(read.metadata["estimate"], MetaValue::Int(3));
    assert_eq!(
        read.metadata["due"],
        MetaValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    );

    let missing = store
        .update_block(&block.id, BlockPatch::default().unset("status"), &scope, None)
        .await;
    assert!(matches!(missing, Err(Error::ValidationError(_))));
}

#[tokio::test]
async fn test_versions_and_conflicts() {
    let store = BlockStore::open_memory().await.unwrap();
    store.register_schema(BlockType::Doc, 1, json!({}), None).await.unwrap();
    store.register_schema(BlockType::Doc, 3, json!({"required": ["title"]}), None).await.unwrap();

    assert_eq!(store.list_schema_versions(BlockType::Doc), vec![1, 3]);
    assert_eq!(store.resolve_schema(BlockType::Doc, SchemaVersion::Latest).unwrap().version, 3);
    assert!(matches!(
        store.resolve_schema(BlockType::Doc, SchemaVersion::Exact(2)),
        Err(Error::SchemaNotFound { version: SchemaVersion::Exact(2), .. })
    ));
    assert!(matches!(
        store.register_schema(BlockType::Doc, 1, json!({"required": ["x"]}), None).await,
        Err(Error::SchemaConflict { version: 1, .. })
    ));

    // A second store over the same data sees the persisted schemas.
    let other = BlockStore::open(store.backend().clone(), store.config().clone()).await.unwrap();
    assert_eq!(other.list_schema_versions(BlockType::Doc), vec![1, 3]);
}

#[tokio::test]
async fn test_concurrent_registration_through_two_handles() {
    let shared = MemoryStore::new();
    let a = BlockStore::open(shared.clone(), StoreConfig::default()).await.unwrap();
    let b = BlockStore::open(shared.clone(), StoreConfig::default()).await.unwrap();

    // Both caches are empty, so each handle passes its local check.
    let (ra, rb) = tokio::join!(
        a.register_schema(BlockType::Task, 1, task_schema(), Some("a")),
        b.register_schema(BlockType::Task, 1, task_schema(), Some("b")),
    );
    let mut outcomes = vec![ra.unwrap(), rb.unwrap()];
    outcomes.sort_by_key(|r| *r == Registered::Unchanged);
    assert_eq!(outcomes, vec![Registered::Added, Registered::Unchanged]);
    assert_eq!(a.log("main", 10).await.unwrap().len(), 1);
    assert_eq!(b.list_schema_versions(BlockType::Task), vec![1]);

    let (ra, rb) = tokio::join!(
        a.register_schema(BlockType::Doc, 2, json!({"required": ["title"]}), None),
        b.register_schema(BlockType::Doc, 2, json!({"required": ["body"]}), None),
    );
    let conflicts = [&ra, &rb]
        .into_iter()
        .filter(|r| matches!(r, Err(Error::SchemaConflict { node_type: BlockType::Doc, version: 2 })))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(ra.is_ok() as usize + rb.is_ok() as usize, 1);
    assert_eq!(shared.counts("main").unwrap().schemas, 2);
}

#[tokio::test]
async fn test_store_rejects_conflicting_schema_row() {
    let shared = MemoryStore::new();
    let store = BlockStore::open(shared.clone(), StoreConfig::default()).await.unwrap();
    store.register_schema(BlockType::Bug, 1, json!({}), None).await.unwrap();

    // A writer that never consulted a cache still hits the store's check.
    let changeset = Changeset::new(CommitMeta::new("racing writer")).with(Mutation::InsertSchema(SchemaRecord::new(
        BlockType::Bug,
        1,
        json!({"required": ["x"]}),
    )));
    let err = shared.commit("main", changeset).await.unwrap_err();
    assert!(matches!(err, Error::SchemaConflict { node_type: BlockType::Bug, version: 1 }));
    assert_eq!(store.resolve_schema(BlockType::Bug, SchemaVersion::Exact(1)).unwrap().schema, json!({}));
}

// ============================================================================
// 2. Branches
// ============================================================================

#[tokio::test]
async fn test_branch_writes_stay_on_branch() {
    let store = BlockStore::open_memory().await.unwrap();
    let main = store.default_scope();
    let shared = store.create_block(NewBlock::new(BlockType::Project, "shared"), &main, None).await.unwrap();

    store.create_branch("experiment", None).await.unwrap();
    let exp = main.on_branch("experiment");
    store
        .update_block(&shared.id, BlockPatch::default().set("stage", "beta"), &exp, None)
        .await
        .unwrap();
    store.create_block(NewBlock::new(BlockType::Project, "only here"), &exp, None).await.unwrap();

    assert_eq!(store.list_blocks(&main).await.unwrap().len(), 1);
    assert!(store.get_block(&shared.id, &main).await.unwrap().metadata.is_empty());
    assert_eq!(store.list_blocks(&exp).await.unwrap().len(), 2);
    assert_eq!(store.log("experiment", 10).await.unwrap().len(), 3);

    let missing = main.on_branch("nowhere");
    let err = store.list_blocks(&missing).await.unwrap_err();
    assert!(matches!(err, Error::PersistenceFailure { transient: false, .. }));
}

// ============================================================================
// 3. SQL dump
// ============================================================================

#[tokio::test]
async fn test_dump_contains_rows() {
    let store = BlockStore::open_memory().await.unwrap();
    let scope = store.default_scope();
    store
        .create_block(NewBlock::new(BlockType::Knowledge, "O'Brien's note").with_property("ok", true), &scope, None)
        .await
        .unwrap();

    let mut out = Vec::new();
    sql::export_dump(store.backend(), &scope.branch, &mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("-- Blocks: 1"));
    assert!(text.contains("-- Properties: 1"));
    assert!(text.contains("O''Brien''s note"));
    assert!(text.contains("'true'"));
}
