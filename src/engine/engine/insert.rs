use super::{EngineInner, Transaction};
use crate::engine::collection_index::IndexType;
use crate::engine::collection_service::CollectionService;
use crate::engine::data_service::DataService;
use crate::engine::index_service::{IndexService, expand_keys};
use crate::engine::snapshot::{LockMode, Snapshot};
use crate::engine::vector_index_service::VectorIndexService;
use crate::engine::{PageAddress, StreamFactory};
use crate::utils::{CaseInsensitiveString, Collation, Order};
use crate::{Error, Result, bson};

/// Strategy for missing `_id` fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BsonAutoId {
    Int32 = 2,
    Int64 = 3,
    ObjectId = 10,
    Guid = 11,
}

/// Catalog row copied out of the collection page before services borrow
/// the snapshot.
pub(crate) struct IndexMeta {
    pub name: String,
    pub expression: String,
    pub unique: bool,
    pub index_type: IndexType,
    pub slot: u8,
}

pub(crate) fn collect_index_metas<SF: StreamFactory>(snapshot: &Snapshot<SF>) -> Vec<IndexMeta> {
    let mut metas: Vec<IndexMeta> = snapshot
        .collection_page()
        .unwrap()
        .get_collection_indexes()
        .map(|index| IndexMeta {
            name: index.name().to_string(),
            expression: index.expression().to_string(),
            unique: index.unique(),
            index_type: index.index_type(),
            slot: index.slot(),
        })
        .collect();
    metas.sort_by_key(|meta| meta.slot);
    metas
}

impl Transaction {
    /// Makes sure a write snapshot over `collection` exists, creating the
    /// collection when `create` is set.
    pub(crate) async fn write_snapshot(&mut self, collection: &str, create: bool) -> Result<bool> {
        let collation = self.collation();
        let max_item_count = self.max_item_count();

        let service = self.service_mut()?;
        let snapshot = service.create_snapshot(LockMode::Write, collection).await?;
        snapshot.ensure_collection_page().await?;

        if snapshot.collection_page().is_none() {
            if !create {
                return Ok(false);
            }
            CollectionService::new(snapshot)
                .add(collection, collation, max_item_count)
                .await?;
        }
        Ok(true)
    }

    /// Read snapshot; `false` when the collection does not exist.
    pub(crate) async fn read_snapshot(&mut self, collection: &str) -> Result<bool> {
        let service = self.service_mut()?;
        let snapshot = service.create_snapshot(LockMode::Read, collection).await?;
        snapshot.ensure_collection_page().await?;
        Ok(snapshot.collection_page().is_some())
    }

    /// Inserts documents; returns the inserted count.
    pub async fn insert(
        &mut self,
        collection: &str,
        docs: Vec<bson::Document>,
        auto_id: BsonAutoId,
    ) -> Result<usize> {
        let mut count = 0;
        for doc in docs {
            self.insert_one(collection, doc, auto_id).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Inserts one document and returns its `_id`.
    pub async fn insert_one(
        &mut self,
        collection: &str,
        doc: bson::Document,
        auto_id: BsonAutoId,
    ) -> Result<bson::Value> {
        let result = self.insert_one_inner(collection, doc, auto_id).await;
        self.observed(result).await
    }

    async fn insert_one_inner(
        &mut self,
        collection: &str,
        doc: bson::Document,
        auto_id: BsonAutoId,
    ) -> Result<bson::Value> {
        self.write_snapshot(collection, true).await?;

        log::trace!("insert into `{collection}`");

        let inner = self.inner().clone();
        let collation = self.collation();
        let max_item_count = self.max_item_count();

        let service = self.service_mut()?;
        let snapshot = service.get_snapshot(collection).unwrap();
        let id = insert_document(
            &inner,
            snapshot,
            collection,
            doc,
            auto_id,
            collation,
            max_item_count,
        )
        .await?;

        self.service_mut()?.safe_point().await?;

        Ok(id)
    }
}

/// Full insert path over an open write snapshot: id resolution, contract
/// pre-checks, data chain, then index nodes (primary key first, chained
/// through `next_node`).
pub(crate) async fn insert_document<SF: StreamFactory>(
    inner: &EngineInner,
    snapshot: &mut Snapshot<SF>,
    collection: &str,
    mut doc: bson::Document,
    auto_id: BsonAutoId,
    collation: Collation,
    max_item_count: u32,
) -> Result<bson::Value> {
    let id = match doc.try_get("_id") {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            generate_id(inner, snapshot, collection, auto_id, collation, max_item_count).await?
        }
    };

    match &id {
        bson::Value::Null
        | bson::Value::MinValue
        | bson::Value::MaxValue
        | bson::Value::Document(_)
        | bson::Value::Array(_)
        | bson::Value::Vector(_) => {
            return Err(Error::new(
                crate::ErrorKind::IndexKeyTooLong,
                format!("invalid _id value: {id:?}"),
            ));
        }
        _ => {}
    }

    // `_id` is always the first field of the stored document
    if doc.keys().next() != Some("_id") {
        let mut rebuilt = bson::Document::new();
        rebuilt.insert("_id", id.clone());
        doc.remove("_id");
        for (key, value) in doc.iter() {
            rebuilt.insert(key.clone(), value.clone());
        }
        doc = rebuilt;
    }

    let metas = collect_index_metas(snapshot);

    // data-contract pre-checks, so failure leaves the collection untouched
    for meta in &metas {
        let value = doc.get_path(&meta.expression);
        match meta.index_type {
            IndexType::Ordered => {
                if value.is_null() && meta.name != "_id" {
                    continue;
                }
                for key in expand_keys(value) {
                    if crate::engine::index_node::index_key_length(&key)?
                        > crate::engine::MAX_INDEX_KEY_LENGTH
                    {
                        return Err(Error::index_key_too_long(&meta.name));
                    }

                    if meta.unique {
                        let mut indexer =
                            IndexService::new(snapshot, collation, max_item_count);
                        if let Some(node) =
                            indexer.find(&meta.name, &key, false, Order::Ascending).await?
                        {
                            return Err(Error::index_duplicate_key(&meta.name, node.into_key()));
                        }
                    }
                }
            }
            IndexType::Vector => {
                if let bson::Value::Vector(vector) = value {
                    let dims = snapshot
                        .collection_page()
                        .unwrap()
                        .get_collection_index(&meta.name)
                        .unwrap()
                        .dims();
                    if vector.len() != dims as usize {
                        return Err(Error::invalid_vector_dimensions(dims, vector.len()));
                    }
                }
            }
        }
    }

    let data_block = {
        let mut data = DataService::new(snapshot, max_item_count);
        data.insert(&doc).await?
    };

    write_index_nodes(snapshot, &metas, &doc, data_block, collation, max_item_count).await?;

    Ok(id)
}

/// Adds every index node for `doc` (metas sorted by slot; `_id` is slot 0
/// and heads the document's node chain).
pub(crate) async fn write_index_nodes<SF: StreamFactory>(
    snapshot: &mut Snapshot<SF>,
    metas: &[IndexMeta],
    doc: &bson::Document,
    data_block: PageAddress,
    collation: Collation,
    max_item_count: u32,
) -> Result<Option<PageAddress>> {
    let mut last_node: Option<PageAddress> = None;
    let mut pk_node: Option<PageAddress> = None;

    for meta in metas {
        let value = doc.get_path(&meta.expression).clone();
        match meta.index_type {
            IndexType::Ordered => {
                if value.is_null() && meta.name != "_id" {
                    continue;
                }
                let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                for key in expand_keys(&value) {
                    let node = indexer
                        .add_node(&meta.name, &key, data_block, last_node)
                        .await?;
                    if pk_node.is_none() {
                        pk_node = Some(node);
                    }
                    last_node = Some(node);
                }
            }
            IndexType::Vector => {
                if let bson::Value::Vector(vector) = &value {
                    let mut vectors = VectorIndexService::new(snapshot, max_item_count);
                    vectors
                        .add_node(&meta.name, vector.as_f32(), data_block)
                        .await?;
                }
            }
        }
    }

    Ok(pk_node)
}

async fn generate_id<SF: StreamFactory>(
    inner: &EngineInner,
    snapshot: &mut Snapshot<SF>,
    collection: &str,
    auto_id: BsonAutoId,
    collation: Collation,
    max_item_count: u32,
) -> Result<bson::Value> {
    Ok(match auto_id {
        BsonAutoId::ObjectId => bson::Value::ObjectId(bson::ObjectId::new()),
        BsonAutoId::Guid => bson::Value::Guid(bson::Guid::new()),
        BsonAutoId::Int32 => {
            let next = next_sequence(inner, snapshot, collection, collation, max_item_count).await?;
            i32::try_from(next)
                .map(bson::Value::Int32)
                .unwrap_or(bson::Value::Int64(next))
        }
        BsonAutoId::Int64 => bson::Value::Int64(
            next_sequence(inner, snapshot, collection, collation, max_item_count).await?,
        ),
    })
}

/// In-memory numeric sequence, seeded from the largest existing `_id` on
/// first use per engine instance.
async fn next_sequence<SF: StreamFactory>(
    inner: &EngineInner,
    snapshot: &mut Snapshot<SF>,
    collection: &str,
    collation: Collation,
    max_item_count: u32,
) -> Result<i64> {
    let key = CaseInsensitiveString::new(collection);
    let current = inner.sequences.borrow().get(&key).copied();

    let next = match current {
        Some(value) => value + 1,
        None => {
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            let last = indexer.first("_id", Order::Descending).await?;
            match last {
                Some(node) => node.key().as_i64().unwrap_or(0) + 1,
                None => 1,
            }
        }
    };

    inner.sequences.borrow_mut().insert(key, next);
    Ok(next)
}
