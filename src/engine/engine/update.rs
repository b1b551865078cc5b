use super::Transaction;
use super::insert::{IndexMeta, collect_index_metas};
use crate::engine::collection_index::IndexType;
use crate::engine::data_service::DataService;
use crate::engine::index_service::{IndexService, expand_keys};
use crate::engine::vector_index_service::VectorIndexService;
use crate::utils::Order;
use crate::{Error, Result, bson};

impl Transaction {
    /// Replaces the document whose `_id` matches `doc`'s; `false` when no
    /// such document exists.
    pub async fn update(&mut self, collection: &str, doc: bson::Document) -> Result<bool> {
        let result = self.update_inner(collection, doc).await;
        self.observed(result).await
    }

    async fn update_inner(&mut self, collection: &str, doc: bson::Document) -> Result<bool> {
        if !self.write_snapshot(collection, false).await? {
            return Ok(false);
        }

        log::trace!("update `{collection}`");

        let id = match doc.try_get("_id") {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                return Err(Error::new(
                    crate::ErrorKind::InvalidBson,
                    "update requires an _id field",
                ));
            }
        };

        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let service = self.service_mut()?;
        let snapshot = service.get_snapshot(collection).unwrap();

        // locate the current version
        let pk_node = {
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.find("_id", &id, false, Order::Ascending).await?
        };
        let Some(pk_node) = pk_node else {
            return Ok(false);
        };
        let data_block = pk_node.data_block();
        let pk_position = pk_node.position();

        let metas: Vec<IndexMeta> = collect_index_metas(snapshot);

        // contract pre-checks against the new content before touching it
        for meta in metas
            .iter()
            .filter(|m| m.name != "_id" && m.index_type == IndexType::Ordered)
        {
            let value = doc.get_path(&meta.expression);
            if value.is_null() {
                continue;
            }
            for key in expand_keys(value) {
                if crate::engine::index_node::index_key_length(&key)?
                    > crate::engine::MAX_INDEX_KEY_LENGTH
                {
                    return Err(Error::index_key_too_long(&meta.name));
                }

                if meta.unique {
                    let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                    if let Some(existing) =
                        indexer.find(&meta.name, &key, false, Order::Ascending).await?
                    {
                        if existing.data_block() != data_block {
                            return Err(Error::index_duplicate_key(
                                &meta.name,
                                existing.into_key(),
                            ));
                        }
                    }
                }
            }
        }

        for meta in metas.iter().filter(|m| m.index_type == IndexType::Vector) {
            if let bson::Value::Vector(vector) = doc.get_path(&meta.expression) {
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

        // rewrite payload in place (the first block never moves)
        {
            let mut data = DataService::new(snapshot, max_item_count);
            data.update(data_block, &doc).await?;
        }

        // secondary keys may have changed: rebuild them
        {
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.delete_document_secondary_nodes(pk_position).await?;
        }

        let vector_names: Vec<String> = metas
            .iter()
            .filter(|m| m.index_type == IndexType::Vector)
            .map(|m| m.name.clone())
            .collect();
        for name in &vector_names {
            let mut vectors = VectorIndexService::new(snapshot, max_item_count);
            vectors.delete_nodes_for(name, data_block).await?;
        }

        let secondary: Vec<IndexMeta> = metas
            .into_iter()
            .filter(|m| m.name != "_id")
            .collect();
        write_index_nodes_chained(
            snapshot,
            &secondary,
            &doc,
            data_block,
            pk_position,
            collation,
            max_item_count,
        )
        .await?;

        self.service_mut()?.safe_point().await?;

        Ok(true)
    }
}

/// Like `write_index_nodes` but chains the new nodes after an existing
/// primary-key node.
pub(crate) async fn write_index_nodes_chained<SF: crate::engine::StreamFactory>(
    snapshot: &mut crate::engine::snapshot::Snapshot<SF>,
    metas: &[IndexMeta],
    doc: &bson::Document,
    data_block: crate::engine::PageAddress,
    pk_position: crate::engine::PageAddress,
    collation: crate::utils::Collation,
    max_item_count: u32,
) -> Result<()> {
    let mut last_node = Some(pk_position);

    for meta in metas {
        let value = doc.get_path(&meta.expression).clone();
        match meta.index_type {
            IndexType::Ordered => {
                if value.is_null() {
                    continue;
                }
                let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                for key in expand_keys(&value) {
                    let node = indexer
                        .add_node(&meta.name, &key, data_block, last_node)
                        .await?;
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

    Ok(())
}
