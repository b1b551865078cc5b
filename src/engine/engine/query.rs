use super::Transaction;
use super::insert::collect_index_metas;
use crate::engine::PageAddress;
use crate::engine::collection_index::IndexType;
use crate::engine::data_service::DataService;
use crate::engine::index_node::IndexNode;
use crate::engine::index_service::IndexService;
use crate::utils::Order;
use crate::{Result, bson};
use futures::Stream;
use std::cmp::Ordering;

/// Engine-level filter. The query language lives above the engine; this
/// is the set of plans the engine executes natively.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every document, in primary-key order.
    All,
    /// The single document with this `_id`.
    ById(bson::Value),
    /// Documents whose `field` equals the value (index seek when an index
    /// covers the field, full scan otherwise).
    Eq(String, bson::Value),
    /// Documents with `from <= field <= to`.
    Between(String, bson::Value, bson::Value),
}

fn normalize_path(path: &str) -> &str {
    path.strip_prefix("$.").unwrap_or(path)
}

/// Skip/limit window over a scan.
struct SkipLimit {
    to_skip: usize,
    remaining: usize,
}

enum Admit {
    Skip,
    Yield,
    Done,
}

impl SkipLimit {
    fn new(skip: usize, limit: usize) -> Self {
        SkipLimit {
            to_skip: skip,
            remaining: limit,
        }
    }

    fn admit(&mut self) -> Admit {
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return Admit::Skip;
        }
        if self.remaining == 0 {
            return Admit::Done;
        }
        self.remaining -= 1;
        Admit::Yield
    }
}

impl Transaction {
    pub(crate) async fn index_first(
        &mut self,
        collection: &str,
        index: &str,
        order: Order,
    ) -> Result<Option<IndexNode>> {
        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        IndexService::new(snapshot, collation, max_item_count)
            .first(index, order)
            .await
    }

    pub(crate) async fn index_step(
        &mut self,
        collection: &str,
        node: &IndexNode,
        order: Order,
    ) -> Result<Option<IndexNode>> {
        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        IndexService::new(snapshot, collation, max_item_count)
            .next(node, order)
            .await
    }

    pub(crate) async fn index_find(
        &mut self,
        collection: &str,
        index: &str,
        key: &bson::Value,
        sibling: bool,
    ) -> Result<Option<IndexNode>> {
        let collation = self.collation();
        let max_item_count = self.max_item_count();
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        IndexService::new(snapshot, collation, max_item_count)
            .find(index, key, sibling, Order::Ascending)
            .await
    }

    /// Rewinds inside a run of equal (or in-range) keys to its first node.
    async fn rewind_to_run_start(
        &mut self,
        collection: &str,
        mut node: IndexNode,
        lower: &bson::Value,
    ) -> Result<IndexNode> {
        let collation = self.collation();
        loop {
            let prev = self
                .index_step(collection, &node, Order::Descending)
                .await?;
            match prev {
                Some(prev) if collation.compare(prev.key(), lower) != Ordering::Less => {
                    node = prev;
                }
                _ => return Ok(node),
            }
        }
    }

    pub(crate) async fn read_doc(
        &mut self,
        collection: &str,
        data_block: PageAddress,
    ) -> Result<bson::Document> {
        let max_item_count = self.max_item_count();
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        DataService::new(snapshot, max_item_count)
            .read_document(data_block)
            .await
    }

    /// Name of an ordered index covering `field`, if any.
    fn index_for_field(&mut self, collection: &str, field: &str) -> Result<Option<String>> {
        let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
        Ok(collect_index_metas(snapshot)
            .into_iter()
            .filter(|meta| meta.index_type == IndexType::Ordered)
            .find(|meta| normalize_path(&meta.expression) == normalize_path(field))
            .map(|meta| meta.name))
    }

    /// Lazy, finite, non-restartable cursor over matching documents.
    pub fn find<'a>(
        &'a mut self,
        collection: &'a str,
        query: Query,
        skip: usize,
        limit: usize,
    ) -> impl Stream<Item = Result<bson::Document>> + 'a {
        async_stream::try_stream! {
            if !self.read_snapshot(collection).await? {
                return;
            }

            let collation = self.collation();
            let mut window = SkipLimit::new(skip, limit);

            match query {
                Query::ById(id) => {
                    if let Some(node) = self.index_find(collection, "_id", &id, false).await? {
                        let doc = self.read_doc(collection, node.data_block()).await?;
                        match window.admit() {
                            Admit::Yield => yield doc,
                            Admit::Skip | Admit::Done => {}
                        }
                    }
                }
                Query::All => {
                    let mut current = self.index_first(collection, "_id", Order::Ascending).await?;
                    while let Some(node) = current {
                        let doc = self.read_doc(collection, node.data_block()).await?;
                        match window.admit() {
                            Admit::Yield => yield doc,
                            Admit::Skip => {}
                            Admit::Done => return,
                        }
                        current = self.index_step(collection, &node, Order::Ascending).await?;
                    }
                }
                Query::Eq(field, value) => {
                    if let Some(index) = self.index_for_field(collection, &field)? {
                        // index seek over the equal run
                        let start = self.index_find(collection, &index, &value, true).await?;
                        if let Some(start) = start {
                            let mut current = Some(
                                self.rewind_to_run_start(collection, start, &value).await?,
                            );
                            while let Some(node) = current {
                                if collation.compare(node.key(), &value) != Ordering::Equal {
                                    break;
                                }
                                let doc = self.read_doc(collection, node.data_block()).await?;
                                match window.admit() {
                                    Admit::Yield => yield doc,
                                    Admit::Skip => {}
                                    Admit::Done => return,
                                }
                                current = self
                                    .index_step(collection, &node, Order::Ascending)
                                    .await?;
                            }
                        }
                    } else {
                        // full scan with a field predicate
                        let mut current =
                            self.index_first(collection, "_id", Order::Ascending).await?;
                        while let Some(node) = current {
                            let doc = self.read_doc(collection, node.data_block()).await?;
                            if collation.compare(doc.get_path(&field), &value) == Ordering::Equal {
                                match window.admit() {
                                    Admit::Yield => yield doc,
                                    Admit::Skip => {}
                                    Admit::Done => return,
                                }
                            }
                            current = self
                                .index_step(collection, &node, Order::Ascending)
                                .await?;
                        }
                    }
                }
                Query::Between(field, from, to) => {
                    if let Some(index) = self.index_for_field(collection, &field)? {
                        let start = self.index_find(collection, &index, &from, true).await?;
                        if let Some(start) = start {
                            let mut current = Some(
                                self.rewind_to_run_start(collection, start, &from).await?,
                            );
                            while let Some(node) = current {
                                if collation.compare(node.key(), &to) == Ordering::Greater {
                                    break;
                                }
                                let doc = self.read_doc(collection, node.data_block()).await?;
                                match window.admit() {
                                    Admit::Yield => yield doc,
                                    Admit::Skip => {}
                                    Admit::Done => return,
                                }
                                current = self
                                    .index_step(collection, &node, Order::Ascending)
                                    .await?;
                            }
                        }
                    } else {
                        let mut current =
                            self.index_first(collection, "_id", Order::Ascending).await?;
                        while let Some(node) = current {
                            let doc = self.read_doc(collection, node.data_block()).await?;
                            let field_value = doc.get_path(&field);
                            let in_range = collation.compare(field_value, &from) != Ordering::Less
                                && collation.compare(field_value, &to) != Ordering::Greater;
                            if in_range {
                                match window.admit() {
                                    Admit::Yield => yield doc,
                                    Admit::Skip => {}
                                    Admit::Done => return,
                                }
                            }
                            current = self
                                .index_step(collection, &node, Order::Ascending)
                                .await?;
                        }
                    }
                }
            }
        }
    }

    /// Eager variant of [`find`](Self::find).
    pub async fn find_vec(
        &mut self,
        collection: &str,
        query: Query,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<bson::Document>> {
        use futures::TryStreamExt;
        let result = {
            let stream = self.find(collection, query, skip, limit);
            futures::pin_mut!(stream);
            stream.try_collect().await
        };
        self.observed(result).await
    }

    pub async fn find_by_id(
        &mut self,
        collection: &str,
        id: &bson::Value,
    ) -> Result<Option<bson::Document>> {
        Ok(self
            .find_vec(collection, Query::ById(id.clone()), 0, 1)
            .await?
            .into_iter()
            .next())
    }

    pub async fn count(&mut self, collection: &str, query: Query) -> Result<usize> {
        Ok(self.find_vec(collection, query, 0, usize::MAX).await?.len())
    }

    pub(crate) async fn find_ids(
        &mut self,
        collection: &str,
        query: Query,
    ) -> Result<Vec<bson::Value>> {
        Ok(self
            .find_vec(collection, query, 0, usize::MAX)
            .await?
            .into_iter()
            .map(|doc| doc.get("_id").clone())
            .collect())
    }

    /// Smallest key of an ordered index.
    pub async fn min(&mut self, collection: &str, index: &str) -> Result<Option<bson::Value>> {
        if !self.read_snapshot(collection).await? {
            return Ok(None);
        }
        Ok(self
            .index_first(collection, index, Order::Ascending)
            .await?
            .map(IndexNode::into_key))
    }

    /// Largest key of an ordered index.
    pub async fn max(&mut self, collection: &str, index: &str) -> Result<Option<bson::Value>> {
        if !self.read_snapshot(collection).await? {
            return Ok(None);
        }
        Ok(self
            .index_first(collection, index, Order::Descending)
            .await?
            .map(IndexNode::into_key))
    }
}
