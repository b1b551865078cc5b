use super::Transaction;
use crate::engine::vector_index_service::VectorIndexService;
use crate::{Result, bson};

impl Transaction {
    /// The `k` nearest documents to `target` under the index's metric,
    /// nearest first, paired with their distances.
    pub async fn top_k_near(
        &mut self,
        collection: &str,
        index: &str,
        target: &[f32],
        k: usize,
    ) -> Result<Vec<(bson::Document, f64)>> {
        self.near_internal(collection, index, target, k, f64::MAX)
            .await
    }

    /// Every document whose distance to `target` is at most
    /// `max_distance`, nearest first.
    pub async fn where_near(
        &mut self,
        collection: &str,
        index: &str,
        target: &[f32],
        max_distance: f64,
    ) -> Result<Vec<bson::Document>> {
        let hits = self
            .near_internal(collection, index, target, usize::MAX, max_distance)
            .await?;
        Ok(hits.into_iter().map(|(doc, _)| doc).collect())
    }

    async fn near_internal(
        &mut self,
        collection: &str,
        index: &str,
        target: &[f32],
        k: usize,
        max_distance: f64,
    ) -> Result<Vec<(bson::Document, f64)>> {
        let result = self
            .near_inner(collection, index, target, k, max_distance)
            .await;
        self.observed(result).await
    }

    async fn near_inner(
        &mut self,
        collection: &str,
        index: &str,
        target: &[f32],
        k: usize,
        max_distance: f64,
    ) -> Result<Vec<(bson::Document, f64)>> {
        if !self.read_snapshot(collection).await? {
            return Ok(Vec::new());
        }

        let max_item_count = self.max_item_count();
        let hits = {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            let mut vectors = VectorIndexService::new(snapshot, max_item_count);
            vectors.search(index, target, k, max_distance).await?
        };

        let mut results = Vec::with_capacity(hits.len());
        for (data_block, distance) in hits {
            let doc = self.read_doc(collection, data_block).await?;
            results.push((doc, distance));
        }

        Ok(results)
    }
}
