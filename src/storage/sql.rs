//! SQL rendering for a version-controlled MySQL-dialect engine.
//!
//! Holds the table layout ([`DDL`]), the statement text each query and
//! mutation maps to, and a dump of a whole branch as a replayable script:
//!
//! ```text
//! branch → export_dump() → CREATE TABLE / INSERT statements
//!   → pipe into the engine's SQL shell to rebuild the branch
//! ```
//!
//! Every string literal goes through [`quote_literal`].

use std::io::Write;

use chrono::{DateTime, Utc};

use super::{BackingStore, BlockQuery, LinkQuery, LinkTarget};
use crate::model::{BlockId, BlockLink, BlockRow, BlockType, Direction, LinkKey};
use crate::property::{encode_operand, quote_literal, FilterOp, Property, PropertyFilter, PropertyValue};
use crate::schema::SchemaRecord;
use crate::tx::{CommitMeta, Mutation};
use crate::Result;

/// Table layout. `properties` carries the one-value-column CHECK.
///
/// `property_value_number` is a JSON scalar so `1` and `1.0` come back
/// apart and integers keep all 64 bits; `property_value_number_key` is its
/// indexed DOUBLE shadow for range scans.
pub const DDL: &str = r#"CREATE TABLE IF NOT EXISTS blocks (
    id VARCHAR(36) PRIMARY KEY,
    namespace VARCHAR(255) NOT NULL,
    block_type VARCHAR(32) NOT NULL,
    schema_version INT NULL,
    text LONGTEXT NOT NULL,
    state VARCHAR(64) NULL,
    visibility VARCHAR(64) NULL,
    block_version BIGINT NULL,
    parent_id VARCHAR(36) NULL,
    has_children BOOLEAN NOT NULL DEFAULT FALSE,
    tags JSON NOT NULL,
    embedding JSON NULL,
    created_at DATETIME(6) NOT NULL,
    updated_at DATETIME(6) NOT NULL,
    INDEX idx_blocks_scope (namespace, block_type),
    INDEX idx_blocks_parent (parent_id)
);

CREATE TABLE IF NOT EXISTS properties (
    block_id VARCHAR(36) NOT NULL,
    property_name VARCHAR(255) NOT NULL,
    property_type VARCHAR(16) NOT NULL,
    property_value_text LONGTEXT NULL,
    property_value_number JSON NULL,
    property_value_number_key DOUBLE AS (CAST(property_value_number AS DOUBLE)) STORED,
    property_value_json JSON NULL,
    is_computed BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME(6) NOT NULL,
    updated_at DATETIME(6) NOT NULL,
    PRIMARY KEY (block_id, property_name),
    FOREIGN KEY (block_id) REFERENCES blocks (id),
    CONSTRAINT chk_one_value_column CHECK (
        (property_value_text IS NOT NULL)
        + (property_value_number IS NOT NULL)
        + (property_value_json IS NOT NULL) = 1
    ),
    INDEX idx_properties_text (property_name, property_value_text(191)),
    INDEX idx_properties_number (property_name, property_value_number_key)
);

CREATE TABLE IF NOT EXISTS links (
    from_id VARCHAR(36) NOT NULL,
    to_id VARCHAR(36) NOT NULL,
    relation VARCHAR(32) NOT NULL,
    priority INT NOT NULL DEFAULT 0,
    link_metadata JSON NULL,
    created_by VARCHAR(255) NULL,
    namespace VARCHAR(255) NOT NULL,
    created_at DATETIME(6) NOT NULL,
    PRIMARY KEY (from_id, to_id, relation),
    FOREIGN KEY (from_id) REFERENCES blocks (id),
    FOREIGN KEY (to_id) REFERENCES blocks (id),
    INDEX idx_links_to (to_id)
);

CREATE TABLE IF NOT EXISTS schemas (
    node_type VARCHAR(32) NOT NULL,
    version INT NOT NULL,
    schema_json JSON NOT NULL,
    created_at DATETIME(6) NOT NULL,
    PRIMARY KEY (node_type, version)
);
"#;

// ============================================================================
// Literals
// ============================================================================

fn opt_lit(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_owned(), quote_literal)
}

fn ts(dt: &DateTime<Utc>) -> String {
    quote_literal(&dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
}

fn json_lit(value: &serde_json::Value) -> String {
    format!("CAST({} AS JSON)", quote_literal(&value.to_string()))
}

/// Keeps the decimal point of a whole float (`1.0`, not `1`).
fn number_lit(n: &serde_json::Number) -> String {
    json_lit(&serde_json::Value::Number(n.clone()))
}

fn bool_lit(b: bool) -> &'static str {
    if b { "TRUE" } else { "FALSE" }
}

fn id_list(ids: &[BlockId]) -> String {
    ids.iter().map(|id| quote_literal(id.as_str())).collect::<Vec<_>>().join(", ")
}

fn in_ids(column: &str, ids: &[BlockId]) -> String {
    if ids.is_empty() {
        "FALSE".to_owned()
    } else {
        format!("{column} IN ({})", id_list(ids))
    }
}

fn key_predicate(key: &LinkKey) -> String {
    format!(
        "(from_id = {} AND to_id = {} AND relation = {})",
        quote_literal(key.from_id.as_str()),
        quote_literal(key.to_id.as_str()),
        quote_literal(key.relation.as_str()),
    )
}

// ============================================================================
// Queries
// ============================================================================

fn filter_predicate(filter: &PropertyFilter) -> String {
    let head = format!("p.block_id = b.id AND p.property_name = {}", quote_literal(&filter.name));
    let (op, operand) = match &filter.op {
        FilterOp::Exists => return format!("EXISTS (SELECT 1 FROM properties p WHERE {head})"),
        FilterOp::Eq(v) => ("=", v),
        FilterOp::Ne(v) => ("<>", v),
        FilterOp::Gt(v) => (">", v),
        FilterOp::Gte(v) => (">=", v),
        FilterOp::Lt(v) => ("<", v),
        FilterOp::Lte(v) => ("<=", v),
    };
    let value = match encode_operand(operand) {
        Some(PropertyValue::Text(t)) => format!("p.property_value_text {op} {}", quote_literal(&t)),
        Some(PropertyValue::Number(n)) => format!("p.property_value_number_key {op} {n}"),
        Some(PropertyValue::Json(j)) => format!("p.property_value_json {op} {}", json_lit(&j)),
        None => bool_lit(op == "<>").to_owned(),
    };
    format!("EXISTS (SELECT 1 FROM properties p WHERE {head} AND {value})")
}

pub fn render_block_query(query: &BlockQuery) -> String {
    let mut conds = Vec::new();
    if let Some(ns) = &query.namespace {
        conds.push(format!("b.namespace = {}", quote_literal(ns)));
    }
    if let Some(ids) = &query.ids {
        conds.push(in_ids("b.id", ids));
    }
    if let Some(t) = query.block_type {
        conds.push(format!("b.block_type = {}", quote_literal(t.as_str())));
    }
    for tag in &query.tags {
        let needle = serde_json::Value::String(tag.clone()).to_string();
        conds.push(format!("JSON_CONTAINS(b.tags, {})", quote_literal(&needle)));
    }
    if let Some(parent) = &query.parent_id {
        conds.push(format!("b.parent_id = {}", quote_literal(parent.as_str())));
    }
    conds.extend(query.property_filters.iter().map(filter_predicate));

    let mut sql = String::from("SELECT b.* FROM blocks b");
    if !conds.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
    sql.push_str(" ORDER BY b.created_at");
    match (query.limit, query.offset) {
        (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (None, 0) => {}
        (None, offset) => sql.push_str(&format!(" LIMIT {} OFFSET {offset}", u64::MAX)),
    }
    sql
}

pub fn render_property_query(ids: &[BlockId]) -> String {
    format!(
        "SELECT * FROM properties WHERE {} ORDER BY block_id, created_at",
        in_ids("block_id", ids)
    )
}

pub fn render_link_query(query: &LinkQuery) -> String {
    let mut conds = vec![match &query.target {
        LinkTarget::Touching { ids, direction } => match direction {
            Direction::Outgoing => in_ids("from_id", ids),
            Direction::Incoming => in_ids("to_id", ids),
            Direction::Both => format!("({} OR {})", in_ids("from_id", ids), in_ids("to_id", ids)),
        },
        LinkTarget::Keys(keys) if keys.is_empty() => "FALSE".to_owned(),
        LinkTarget::Keys(keys) => {
            format!("({})", keys.iter().map(key_predicate).collect::<Vec<_>>().join(" OR "))
        }
    }];
    if let Some(r) = query.relation {
        conds.push(format!("relation = {}", quote_literal(r.as_str())));
    }
    if let Some(ns) = &query.namespace {
        conds.push(format!("namespace = {}", quote_literal(ns)));
    }
    format!("SELECT * FROM links WHERE {}", conds.join(" AND "))
}

pub fn render_schema_query(node_type: Option<BlockType>) -> String {
    match node_type {
        Some(t) => format!(
            "SELECT * FROM schemas WHERE node_type = {} ORDER BY version",
            quote_literal(t.as_str())
        ),
        None => "SELECT * FROM schemas ORDER BY node_type, version".to_owned(),
    }
}

// ============================================================================
// Mutations
// ============================================================================

fn block_values(row: &BlockRow) -> Vec<(&'static str, String)> {
    let tags = serde_json::Value::from(row.tags.clone());
    vec![
        ("namespace", quote_literal(&row.namespace)),
        ("block_type", quote_literal(row.block_type.as_str())),
        ("schema_version", row.schema_version.map_or("NULL".into(), |v| v.to_string())),
        ("text", quote_literal(&row.text)),
        ("state", opt_lit(row.state.as_deref())),
        ("visibility", opt_lit(row.visibility.as_deref())),
        ("block_version", row.block_version.map_or("NULL".into(), |v| v.to_string())),
        ("parent_id", opt_lit(row.parent_id.as_ref().map(BlockId::as_str))),
        ("has_children", bool_lit(row.has_children).to_owned()),
        ("tags", json_lit(&tags)),
        (
            "embedding",
            row.embedding
                .as_ref()
                .map_or("NULL".into(), |e| json_lit(&serde_json::Value::from(e.clone()))),
        ),
        ("created_at", ts(&row.created_at)),
        ("updated_at", ts(&row.updated_at)),
    ]
}

fn insert(table: &str, columns: &[(&str, String)]) -> String {
    let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
    let values: Vec<&str> = columns.iter().map(|(_, v)| v.as_str()).collect();
    format!("INSERT INTO {table} ({}) VALUES ({})", names.join(", "), values.join(", "))
}

fn property_values(p: &Property) -> Vec<(&'static str, String)> {
    let (text, number, json) = p.columns();
    vec![
        ("block_id", quote_literal(p.block_id.as_str())),
        ("property_name", quote_literal(&p.name)),
        ("property_type", quote_literal(p.property_type().as_str())),
        ("property_value_text", opt_lit(text)),
        ("property_value_number", number.map_or("NULL".into(), number_lit)),
        ("property_value_json", json.map_or("NULL".into(), json_lit)),
        ("is_computed", bool_lit(p.is_computed).to_owned()),
        ("created_at", ts(&p.created_at)),
        ("updated_at", ts(&p.updated_at)),
    ]
}

fn link_values(l: &BlockLink) -> Vec<(&'static str, String)> {
    vec![
        ("from_id", quote_literal(l.from_id.as_str())),
        ("to_id", quote_literal(l.to_id.as_str())),
        ("relation", quote_literal(l.relation.as_str())),
        ("priority", l.priority.to_string()),
        ("link_metadata", l.link_metadata.as_ref().map_or("NULL".into(), json_lit)),
        ("created_by", opt_lit(l.created_by.as_deref())),
        ("namespace", quote_literal(&l.namespace)),
        ("created_at", ts(&l.created_at)),
    ]
}

fn schema_values(r: &SchemaRecord) -> Vec<(&'static str, String)> {
    vec![
        ("node_type", quote_literal(r.node_type.as_str())),
        ("version", r.version.to_string()),
        ("schema_json", json_lit(&r.schema)),
        ("created_at", ts(&r.created_at)),
    ]
}

/// Statement text for one mutation. Multi-statement mutations are joined
/// with `; `.
pub fn render_mutation(mutation: &Mutation) -> String {
    match mutation {
        Mutation::InsertBlock(row) => {
            let mut cols = vec![("id", quote_literal(row.id.as_str()))];
            cols.extend(block_values(row));
            insert("blocks", &cols)
        }
        Mutation::UpdateBlock { id, changes } => {
            let mut sets = Vec::new();
            if let Some(text) = &changes.text {
                sets.push(format!("text = {}", quote_literal(text)));
            }
            if let Some(tags) = &changes.tags {
                sets.push(format!("tags = {}", json_lit(&serde_json::Value::from(tags.clone()))));
            }
            if let Some(state) = &changes.state {
                sets.push(format!("state = {}", opt_lit(state.as_deref())));
            }
            if let Some(visibility) = &changes.visibility {
                sets.push(format!("visibility = {}", opt_lit(visibility.as_deref())));
            }
            if let Some(v) = changes.block_version {
                sets.push(format!("block_version = {}", v.map_or("NULL".into(), |v| v.to_string())));
            }
            if let Some(parent) = &changes.parent_id {
                sets.push(format!("parent_id = {}", opt_lit(parent.as_ref().map(BlockId::as_str))));
            }
            if let Some(v) = changes.schema_version {
                sets.push(format!("schema_version = {}", v.map_or("NULL".into(), |v| v.to_string())));
            }
            if let Some(embedding) = &changes.embedding {
                let lit = embedding.as_ref().map_or("NULL".into(), |e| json_lit(&serde_json::Value::from(e.clone())));
                sets.push(format!("embedding = {lit}"));
            }
            sets.push(format!("updated_at = {}", ts(&changes.updated_at)));
            format!("UPDATE blocks SET {} WHERE id = {}", sets.join(", "), quote_literal(id.as_str()))
        }
        Mutation::DeleteBlock(id) => format!("DELETE FROM blocks WHERE id = {}", quote_literal(id.as_str())),
        Mutation::UpsertProperty(p) => format!(
            "{} ON DUPLICATE KEY UPDATE property_type = VALUES(property_type), \
             property_value_text = VALUES(property_value_text), \
             property_value_number = VALUES(property_value_number), \
             property_value_json = VALUES(property_value_json), \
             is_computed = VALUES(is_computed), updated_at = VALUES(updated_at)",
            insert("properties", &property_values(p))
        ),
        Mutation::DeleteProperty { block_id, name } => format!(
            "DELETE FROM properties WHERE block_id = {} AND property_name = {}",
            quote_literal(block_id.as_str()),
            quote_literal(name)
        ),
        Mutation::DeleteProperties(id) => {
            format!("DELETE FROM properties WHERE block_id = {}", quote_literal(id.as_str()))
        }
        Mutation::InsertLink(link) => insert("links", &link_values(link)),
        Mutation::DeleteLink(key) => format!("DELETE FROM links WHERE {}", key_predicate(key)),
        Mutation::DeleteLinksFor(id) => {
            let id = quote_literal(id.as_str());
            format!("DELETE FROM links WHERE from_id = {id} OR to_id = {id}")
        }
        Mutation::InsertSchema(record) => insert("schemas", &schema_values(record)),
        Mutation::SetNamespace { block_id, namespace } => {
            let id = quote_literal(block_id.as_str());
            let ns = quote_literal(namespace);
            format!(
                "UPDATE blocks SET namespace = {ns}, updated_at = CURRENT_TIMESTAMP(6) WHERE id = {id}; \
                 UPDATE links SET namespace = {ns} WHERE from_id = {id}"
            )
        }
        Mutation::RefreshHasChildren(id) => {
            let id = quote_literal(id.as_str());
            format!(
                "UPDATE blocks SET has_children = EXISTS (SELECT 1 FROM (SELECT parent_id FROM blocks) c \
                 WHERE c.parent_id = {id}) WHERE id = {id}"
            )
        }
    }
}

// ============================================================================
// Version control
// ============================================================================

pub fn render_checkout(branch: &str) -> String {
    format!("CALL DOLT_CHECKOUT({})", quote_literal(branch))
}

pub fn render_create_branch(name: &str, from: &str) -> String {
    format!("CALL DOLT_BRANCH({}, {})", quote_literal(name), quote_literal(from))
}

pub fn render_commit(meta: &CommitMeta) -> String {
    match &meta.author {
        Some(author) => format!(
            "CALL DOLT_COMMIT('-Am', {}, '--author', {})",
            quote_literal(&meta.message),
            quote_literal(author)
        ),
        None => format!("CALL DOLT_COMMIT('-Am', {})", quote_literal(&meta.message)),
    }
}

// ============================================================================
// Dump
// ============================================================================

/// Write `branch` as a script that recreates it: layout, then schemas,
/// blocks, properties and links.
pub async fn export_dump<B: BackingStore>(store: &B, branch: &str, writer: &mut dyn Write) -> Result<()> {
    let schemas = store.select_schemas(branch, None).await?;
    let blocks = store.select_blocks(branch, &BlockQuery::default()).await?;
    let ids: Vec<BlockId> = blocks.iter().map(|b| b.id.clone()).collect();
    let properties = store.select_properties(branch, &ids).await?;
    let links = store.select_links(branch, &LinkQuery::touching(ids, Direction::Outgoing)).await?;

    writeln!(writer, "-- memblock SQL dump of branch {}", quote_literal(branch))?;
    writeln!(writer, "-- Schemas: {}", schemas.len())?;
    writeln!(writer, "-- Blocks: {}", blocks.len())?;
    writeln!(writer, "-- Properties: {}", properties.len())?;
    writeln!(writer, "-- Links: {}", links.len())?;
    writeln!(writer)?;
    writeln!(writer, "{};", render_checkout(branch))?;
    writeln!(writer, "{DDL}")?;

    let mutations = schemas
        .into_iter()
        .map(Mutation::InsertSchema)
        .chain(blocks.into_iter().map(Mutation::InsertBlock))
        .chain(properties.into_iter().map(Mutation::UpsertProperty))
        .chain(links.into_iter().map(Mutation::InsertLink));
    for mutation in mutations {
        writeln!(writer, "{};", render_mutation(&mutation))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkRelation, MetaValue};
    use crate::property::PropertyType;
    use crate::storage::MemoryStore;
    use crate::tx::Changeset;

    fn row(id: &str, text: &str) -> BlockRow {
        let now = Utc::now();
        BlockRow {
            id: id.into(),
            namespace: "default".into(),
            block_type: BlockType::Knowledge,
            schema_version: None,
            text: text.into(),
            state: None,
            visibility: None,
            block_version: None,
            parent_id: None,
            has_children: false,
            tags: vec!["a\"b".into()],
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_ddl_declares_one_column_check() {
        assert!(DDL.contains("CHECK ("));
        assert!(DDL.contains("PRIMARY KEY (block_id, property_name)"));
        assert!(DDL.contains("PRIMARY KEY (node_type, version)"));
        assert!(DDL.contains("FOREIGN KEY (to_id) REFERENCES blocks (id)"));
    }

    #[test]
    fn test_hostile_text_stays_inside_literal() {
        let sql = render_mutation(&Mutation::InsertBlock(row("x", "it's'); DROP TABLE blocks; --\0")));
        assert!(sql.contains("'it''s''); DROP TABLE blocks; --'"), "{sql}");
        assert!(!sql.contains('\0'));
    }

    #[test]
    fn test_property_upsert_renders_single_column() {
        let p = Property::from_raw("b1".into(), "done", PropertyType::Bool, &MetaValue::Bool(true)).unwrap();
        let sql = render_mutation(&Mutation::UpsertProperty(p));
        assert!(sql.starts_with("INSERT INTO properties"));
        assert!(sql.contains("'bool', 'true', NULL, NULL"), "{sql}");
        assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
    }

    /// Pull the number column literal back out of a rendered upsert and
    /// load it the way a driver row would arrive.
    fn reload_number(p: &Property) -> MetaValue {
        let sql = render_mutation(&Mutation::UpsertProperty(p.clone()));
        let start = sql.find("CAST('").map(|i| i + "CAST('".len()).unwrap();
        let end = start + sql[start..].find("' AS JSON)").unwrap();
        let number: serde_json::Number = serde_json::from_str(&sql[start..end]).unwrap();
        let row = Property::from_columns(p.block_id.clone(), p.name.clone(), PropertyType::Number, None, Some(number), None)
            .unwrap();
        crate::property::decode(&row).unwrap()
    }

    #[test]
    fn test_number_column_keeps_int_and_float_apart() {
        for value in [
            MetaValue::Int(1),
            MetaValue::Float(1.0),
            MetaValue::Float(-0.25),
            MetaValue::Int(9_007_199_254_740_993),
            MetaValue::Int(i64::MIN),
        ] {
            let p = Property::from_raw("b1".into(), "n", PropertyType::Number, &value).unwrap();
            assert_eq!(reload_number(&p), value);
        }
        assert!(DDL.contains("property_value_number JSON NULL"));
    }

    #[test]
    fn test_update_sets_only_changed_columns() {
        let old = row("u1", "before");
        let mut new = old.clone();
        new.text = "after".into();
        let changes = crate::tx::BlockChanges::between(&old, &new, Utc::now());
        let sql = render_mutation(&Mutation::UpdateBlock { id: "u1".into(), changes });
        assert!(sql.starts_with("UPDATE blocks SET text = 'after', updated_at = "), "{sql}");
        assert!(!sql.contains("namespace"));
        assert!(!sql.contains("has_children"));
    }

    #[test]
    fn test_block_query_rendering() {
        let q = BlockQuery {
            namespace: Some("team".into()),
            block_type: Some(BlockType::Task),
            tags: vec!["urgent".into()],
            property_filters: vec![
                PropertyFilter::new("priority", FilterOp::Gte(MetaValue::Int(2))),
                PropertyFilter::exists("due"),
            ],
            limit: Some(10),
            ..Default::default()
        };
        let sql = render_block_query(&q);
        assert!(sql.contains("b.namespace = 'team'"));
        assert!(sql.contains("b.block_type = 'task'"));
        assert!(sql.contains(r#"JSON_CONTAINS(b.tags, '"urgent"')"#));
        assert!(sql.contains("p.property_value_number_key >= 2"));
        assert!(sql.contains("p.property_name = 'due')"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 0"));

        assert!(render_block_query(&BlockQuery::by_ids(Vec::new())).contains("WHERE FALSE"));
        assert_eq!(render_block_query(&BlockQuery::default()), "SELECT b.* FROM blocks b ORDER BY b.created_at");
    }

    #[test]
    fn test_link_query_rendering() {
        let q = LinkQuery::touching(["a".into()], Direction::Both).with_relation(Some(LinkRelation::Blocks));
        assert_eq!(
            render_link_query(&q),
            "SELECT * FROM links WHERE (from_id IN ('a') OR to_id IN ('a')) AND relation = 'blocks'"
        );
        let q = LinkQuery::keys([LinkKey::new("a", "b", LinkRelation::Mentions)]);
        assert!(render_link_query(&q).contains("(from_id = 'a' AND to_id = 'b' AND relation = 'mentions')"));
    }

    #[test]
    fn test_commit_rendering() {
        let sql = render_commit(&CommitMeta::new("add 'x'").by(Some("ada")));
        assert_eq!(sql, "CALL DOLT_COMMIT('-Am', 'add ''x''', '--author', 'ada')");
        assert_eq!(render_checkout("main"), "CALL DOLT_CHECKOUT('main')");
    }

    #[tokio::test]
    async fn test_export_dump() {
        let store = MemoryStore::new();
        let p = Property::from_raw("k1".into(), "n", PropertyType::Number, &MetaValue::Int(4)).unwrap();
        let cs = Changeset::new(CommitMeta::new("seed"))
            .with(Mutation::InsertBlock(row("k1", "first")))
            .with(Mutation::InsertBlock(row("k2", "second")))
            .with(Mutation::UpsertProperty(p))
            .with(Mutation::InsertLink(BlockLink {
                from_id: "k1".into(),
                to_id: "k2".into(),
                relation: LinkRelation::References,
                priority: 1,
                link_metadata: None,
                created_by: None,
                namespace: "default".into(),
                created_at: Utc::now(),
            }));
        store.commit("main", cs).await.unwrap();

        let mut out = Vec::new();
        export_dump(&store, "main", &mut out).await.unwrap();
        let dump = String::from_utf8(out).unwrap();
        assert!(dump.contains("-- Blocks: 2"));
        assert!(dump.contains("-- Links: 1"));
        assert!(dump.contains("CALL DOLT_CHECKOUT('main');"));
        assert_eq!(dump.matches("INSERT INTO blocks").count(), 2);
        assert!(dump.contains("INSERT INTO links"));
    }
}
