use super::Transaction;
use super::insert::collect_index_metas;
use crate::engine::collection_index::IndexType;
use crate::engine::data_service::DataService;
use crate::engine::index_service::{IndexService, expand_keys};
use crate::engine::vector_index_service::VectorIndexService;
use crate::utils::{Order, StrExtension};
use crate::{Error, Result, bson};

impl Transaction {
    /// Creates an ordered index over `expression` and back-fills it from
    /// the existing documents. `false` when it already existed.
    pub async fn ensure_index(
        &mut self,
        collection: &str,
        name: &str,
        expression: &str,
        unique: bool,
    ) -> Result<bool> {
        let result = self
            .ensure_index_inner(collection, name, expression, unique)
            .await;
        self.observed(result).await
    }

    async fn ensure_index_inner(
        &mut self,
        collection: &str,
        name: &str,
        expression: &str,
        unique: bool,
    ) -> Result<bool> {
        if !name.is_word() || name.starts_with('$') {
            return Err(Error::invalid_index_name(name));
        }

        self.write_snapshot(collection, true).await?;

        let collation = self.collation();
        let max_item_count = self.max_item_count();

        {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            if let Some(existing) = snapshot.collection_page().unwrap().get_collection_index(name)
            {
                if existing.expression() == expression
                    && existing.unique() == unique
                    && existing.index_type() == IndexType::Ordered
                {
                    return Ok(false);
                }
                return Err(Error::index_already_exists(name));
            }

            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.create_index(name, expression, unique).await?;
        }

        log::debug!("building index {name} on `{collection}`");

        // back-fill from every live document, appending to each document's
        // node chain
        let pk_nodes = {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.find_all("_id", Order::Ascending).await?
        };

        for pk_node in pk_nodes {
            {
                let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
                snapshot.ensure_collection_page().await?;

                let doc = {
                    let mut data = DataService::new(snapshot, max_item_count);
                    data.read_document(pk_node.data_block()).await?
                };

                let value = doc.get_path(expression).clone();
                if value.is_null() {
                    continue;
                }

                let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                let mut last = indexer.last_chain_node(pk_node.position()).await?;
                for key in expand_keys(&value) {
                    last = indexer
                        .add_node(name, &key, pk_node.data_block(), Some(last))
                        .await?;
                }
            }

            self.service_mut()?.safe_point().await?;
        }

        Ok(true)
    }

    /// Removes an index (ordered or vector); `false` when it was absent.
    pub async fn drop_index(&mut self, collection: &str, name: &str) -> Result<bool> {
        if !self.write_snapshot(collection, false).await? {
            return Ok(false);
        }

        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();

        let index_type = match snapshot
            .collection_page()
            .unwrap()
            .get_collection_index(name)
        {
            Some(index) => index.index_type(),
            None => return Ok(false),
        };

        match index_type {
            IndexType::Ordered => {
                let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                indexer.drop_index(name).await?;
            }
            IndexType::Vector => {
                let mut vectors = VectorIndexService::new(snapshot, max_item_count);
                vectors.drop_vector_index(name).await?;
            }
        }

        self.service_mut()?.safe_point().await?;

        Ok(true)
    }

    /// Creates a vector index over `expression` (a field holding a
    /// `Vector` value) and back-fills it. `false` when it already existed.
    pub async fn ensure_vector_index(
        &mut self,
        collection: &str,
        name: &str,
        expression: &str,
        dims: u16,
        metric: crate::engine::VectorDistanceMetric,
    ) -> Result<bool> {
        let result = self
            .ensure_vector_index_inner(collection, name, expression, dims, metric)
            .await;
        self.observed(result).await
    }

    async fn ensure_vector_index_inner(
        &mut self,
        collection: &str,
        name: &str,
        expression: &str,
        dims: u16,
        metric: crate::engine::VectorDistanceMetric,
    ) -> Result<bool> {
        if !name.is_word() || name.starts_with('$') {
            return Err(Error::invalid_index_name(name));
        }

        self.write_snapshot(collection, true).await?;

        let collation = self.collation();
        let max_item_count = self.max_item_count();

        {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            if let Some(existing) = snapshot.collection_page().unwrap().get_collection_index(name)
            {
                if existing.index_type() == IndexType::Vector
                    && existing.expression() == expression
                    && existing.dims() == dims
                    && existing.metric() == metric
                {
                    return Ok(false);
                }
                return Err(Error::index_already_exists(name));
            }

            let mut vectors = VectorIndexService::new(snapshot, max_item_count);
            vectors.create_vector_index(name, expression, dims, metric)?;
        }

        log::debug!("building vector index {name} on `{collection}`");

        let pk_nodes = {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            indexer.find_all("_id", Order::Ascending).await?
        };

        for pk_node in pk_nodes {
            {
                let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
                snapshot.ensure_collection_page().await?;

                let doc = {
                    let mut data = DataService::new(snapshot, max_item_count);
                    data.read_document(pk_node.data_block()).await?
                };

                if let bson::Value::Vector(vector) = doc.get_path(expression) {
                    if vector.len() != dims as usize {
                        return Err(Error::invalid_vector_dimensions(dims, vector.len()));
                    }
                    let vector = vector.clone();
                    let mut vectors = VectorIndexService::new(snapshot, max_item_count);
                    vectors
                        .add_node(name, vector.as_f32(), pk_node.data_block())
                        .await?;
                }
            }

            self.service_mut()?.safe_point().await?;
        }

        Ok(true)
    }

    /// Index metadata of a collection: `(name, expression, unique)`.
    pub async fn get_indexes(&mut self, collection: &str) -> Result<Vec<(String, String, bool)>> {
        if !self.read_snapshot(collection).await? {
            return Err(Error::collection_not_found(collection));
        }

        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        Ok(collect_index_metas(snapshot)
            .into_iter()
            .map(|meta| (meta.name, meta.expression, meta.unique))
            .collect())
    }
}
