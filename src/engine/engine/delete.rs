use super::Transaction;
use super::insert::collect_index_metas;
use super::query::Query;
use crate::engine::collection_index::IndexType;
use crate::engine::data_service::DataService;
use crate::engine::index_service::IndexService;
use crate::engine::vector_index_service::VectorIndexService;
use crate::utils::Order;
use crate::{Result, bson};

impl Transaction {
    /// Deletes the document with `_id == id`; `false` when absent.
    pub async fn delete(&mut self, collection: &str, id: &bson::Value) -> Result<bool> {
        let result = self.delete_inner(collection, id).await;
        self.observed(result).await
    }

    async fn delete_inner(&mut self, collection: &str, id: &bson::Value) -> Result<bool> {
        if !self.write_snapshot(collection, false).await? {
            return Ok(false);
        }

        log::trace!("delete from `{collection}`");

        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let service = self.service_mut()?;
        let snapshot = service.get_snapshot(collection).unwrap();

        let pk_node = {
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.find("_id", id, false, Order::Ascending).await?
        };
        let Some(pk_node) = pk_node else {
            return Ok(false);
        };

        let data_block = pk_node.data_block();
        let pk_position = pk_node.position();

        let vector_names: Vec<String> = collect_index_metas(snapshot)
            .into_iter()
            .filter(|meta| meta.index_type == IndexType::Vector)
            .map(|meta| meta.name)
            .collect();

        {
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.delete_all(pk_position).await?;
        }

        for name in &vector_names {
            let mut vectors = VectorIndexService::new(snapshot, max_item_count);
            vectors.delete_nodes_for(name, data_block).await?;
        }

        {
            let mut data = DataService::new(snapshot, max_item_count);
            data.delete(data_block).await?;
        }

        self.service_mut()?.safe_point().await?;

        Ok(true)
    }

    /// Deletes every document matching `query`; returns the count.
    pub async fn delete_many(&mut self, collection: &str, query: Query) -> Result<usize> {
        if !self.write_snapshot(collection, false).await? {
            return Ok(0);
        }

        // materialize the target ids first: the scan must not observe its
        // own deletions
        let ids = self.find_ids(collection, query).await?;

        let mut count = 0;
        for id in ids {
            if self.delete(collection, &id).await? {
                count += 1;
            }
        }

        log::debug!("deleted {count} documents from `{collection}`");

        Ok(count)
    }
}
