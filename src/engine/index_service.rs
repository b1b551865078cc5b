use crate::engine::index_node::{IndexNode, index_key_length};
use crate::engine::pages::MAX_INDEX_LENGTH;
use crate::engine::snapshot::Snapshot;
use crate::engine::{
    MAX_INDEX_KEY_LENGTH, MAX_LEVEL_LENGTH, PageAddress, PageType, StreamFactory,
};
use crate::utils::{Collation, Order};
use crate::{Error, Result, bson};
use std::cmp::Ordering;

/// Skiplist index operations over one snapshot.
///
/// Every index keeps two full-height sentinel nodes (`MinValue` head,
/// `MaxValue` tail) linked on all levels, so a descent can always compare
/// against a real node. Nodes of one document are chained through
/// `next_node` across all indexes, starting at the primary-key node.
pub(crate) struct IndexService<'snapshot, SF: StreamFactory> {
    snapshot: &'snapshot mut Snapshot<SF>,
    collation: Collation,
    max_item_count: u32,
}

impl<'snapshot, SF: StreamFactory> IndexService<'snapshot, SF> {
    pub fn new(
        snapshot: &'snapshot mut Snapshot<SF>,
        collation: Collation,
        max_item_count: u32,
    ) -> Self {
        Self {
            snapshot,
            collation,
            max_item_count,
        }
    }

    pub fn collation(&self) -> &Collation {
        &self.collation
    }

    pub fn snapshot(&mut self) -> &mut Snapshot<SF> {
        self.snapshot
    }

    /// Random node height: geometric, p = 1/2, capped.
    pub fn flip_coin() -> u8 {
        let mut levels = 1;
        while rand::random_bool(0.5) && levels < MAX_LEVEL_LENGTH {
            levels += 1;
        }
        levels
    }

    pub async fn get_node(&mut self, address: PageAddress) -> Result<IndexNode> {
        self.snapshot
            .get_index_page(address.page_id())
            .await?
            .get_index_node(address.index())
    }

    async fn set_node_next(&mut self, address: PageAddress, level: u8, target: PageAddress) -> Result<()> {
        self.snapshot
            .get_index_page(address.page_id())
            .await?
            .set_node_next(address.index(), level, target);
        Ok(())
    }

    async fn set_node_prev(&mut self, address: PageAddress, level: u8, target: PageAddress) -> Result<()> {
        self.snapshot
            .get_index_page(address.page_id())
            .await?
            .set_node_prev(address.index(), level, target);
        Ok(())
    }

    pub async fn set_node_next_node(&mut self, address: PageAddress, target: PageAddress) -> Result<()> {
        self.snapshot
            .get_index_page(address.page_id())
            .await?
            .set_node_next_node(address.index(), target);
        Ok(())
    }

    /// Creates a new index structure: catalog entry plus sentinel nodes.
    pub async fn create_index(&mut self, name: &str, expression: &str, unique: bool) -> Result<u8> {
        let collection_page = self.snapshot.collection_page_mut().unwrap();
        let slot = collection_page
            .insert_collection_index(
                name,
                crate::engine::collection_index::IndexType::Ordered,
                expression,
                unique,
            )?
            .slot();

        let page_id = self.snapshot.new_page(PageType::Index).await?;

        let length = IndexNode::get_node_length(MAX_LEVEL_LENGTH, &bson::Value::MinValue)?;
        let (head_position, tail_position) = {
            let index_page = self.snapshot.get_index_page(page_id).await?;
            let head = index_page.insert_index_node(
                slot,
                MAX_LEVEL_LENGTH,
                &bson::Value::MinValue,
                PageAddress::EMPTY,
                length,
            )?;
            let tail = index_page.insert_index_node(
                slot,
                MAX_LEVEL_LENGTH,
                &bson::Value::MaxValue,
                PageAddress::EMPTY,
                length,
            )?;
            (head.position(), tail.position())
        };

        // sentinels are linked on every level
        for level in 0..MAX_LEVEL_LENGTH {
            self.set_node_next(head_position, level, tail_position).await?;
            self.set_node_prev(tail_position, level, head_position).await?;
        }

        self.snapshot
            .add_or_remove_free_index_list(page_id, name, MAX_INDEX_LENGTH)
            .await?;

        let collection_page = self.snapshot.collection_page_mut().unwrap();
        let index = collection_page.get_collection_index_mut(name).unwrap();
        index.set_head(head_position);
        index.set_tail(tail_position);

        log::debug!("created index {name} (slot {slot}, unique: {unique})");

        Ok(slot)
    }

    /// Inserts one key → data-block entry. `last_node` chains the new node
    /// after the document's previous index node.
    pub async fn add_node(
        &mut self,
        index_name: &str,
        key: &bson::Value,
        data_block: PageAddress,
        last_node: Option<PageAddress>,
    ) -> Result<PageAddress> {
        if index_key_length(key)? > MAX_INDEX_KEY_LENGTH {
            return Err(Error::index_key_too_long(index_name));
        }

        let (head, unique, free_list) = {
            let collection_page = self.snapshot.collection_page().unwrap();
            let index = collection_page
                .get_collection_index(index_name)
                .ok_or_else(|| {
                    Error::index_not_found(self.snapshot.collection_name(), index_name)
                })?;
            (index.head(), index.unique(), index.free_index_page_list())
        };

        let levels = Self::flip_coin();
        let node_length = IndexNode::get_node_length(levels, key)?;

        // per-level insertion points: the node left of the new key
        let mut path = [PageAddress::EMPTY; MAX_LEVEL_LENGTH as usize];
        let mut left_address = head;
        let mut left = self.get_node(left_address).await?;
        let mut counter = 0u32;

        for level in (0..MAX_LEVEL_LENGTH).rev() {
            let mut right_address = left.get_next(level);

            loop {
                if counter > self.max_item_count {
                    return Err(Error::invalid_datafile_state(format!(
                        "loop detected inserting into index {index_name}"
                    )));
                }
                counter += 1;

                let right = self.get_node(right_address).await?;
                let diff = self.collation.compare(right.key(), key);

                if diff == Ordering::Equal && unique && level == 0 {
                    return Err(Error::index_duplicate_key(index_name, right.into_key()));
                }

                if diff == Ordering::Less {
                    left_address = right_address;
                    right_address = right.get_next(level);
                    left = right;
                } else {
                    break;
                }
            }

            path[level as usize] = left_address;
        }

        // place the node, then stitch each level between path and its next
        let slot = self.index_slot(index_name)?;
        let page_id = self
            .snapshot
            .get_free_index_page(PageType::Index, free_list)
            .await?;
        let node_position = {
            let page = self.snapshot.get_index_page(page_id).await?;
            page.insert_index_node(slot, levels, key, data_block, node_length)?
                .position()
        };

        self.snapshot
            .add_or_remove_free_index_list(page_id, index_name, MAX_INDEX_LENGTH)
            .await?;

        for level in 0..levels {
            let prev_address = path[level as usize];
            let prev = self.get_node(prev_address).await?;
            let next_address = prev.get_next(level);

            self.set_node_next(node_position, level, next_address).await?;
            self.set_node_prev(node_position, level, prev_address).await?;
            self.set_node_next(prev_address, level, node_position).await?;
            if !next_address.is_empty() {
                self.set_node_prev(next_address, level, node_position).await?;
            }
        }

        if let Some(last) = last_node {
            self.set_node_next_node(last, node_position).await?;
        }

        Ok(node_position)
    }

    fn index_slot(&self, index_name: &str) -> Result<u8> {
        Ok(self
            .snapshot
            .collection_page()
            .unwrap()
            .get_collection_index(index_name)
            .ok_or_else(|| Error::index_not_found(self.snapshot.collection_name(), index_name))?
            .slot())
    }

    /// Deletes every index node of one document, following the `next_node`
    /// chain from its primary-key node.
    pub async fn delete_all(&mut self, first_node: PageAddress) -> Result<()> {
        let mut current = first_node;
        let mut counter = 0u32;

        while !current.is_empty() {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(
                    "loop detected deleting index nodes",
                ));
            }
            counter += 1;

            let node = self.get_node(current).await?;
            let next = node.next_node();
            self.delete_single_node(node).await?;
            current = next;
        }

        Ok(())
    }

    /// Last node of a document's chain (where index-build appends).
    pub async fn last_chain_node(&mut self, pk_position: PageAddress) -> Result<PageAddress> {
        let mut current = pk_position;
        let mut counter = 0u32;

        loop {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(
                    "loop detected walking document node chain",
                ));
            }
            counter += 1;

            let node = self.get_node(current).await?;
            if node.next_node().is_empty() {
                return Ok(current);
            }
            current = node.next_node();
        }
    }

    /// Deletes a document's secondary index nodes, keeping the
    /// primary-key node (update path: keys may have changed).
    pub async fn delete_document_secondary_nodes(
        &mut self,
        pk_position: PageAddress,
    ) -> Result<()> {
        let pk = self.get_node(pk_position).await?;
        let mut current = pk.next_node();
        self.set_node_next_node(pk_position, PageAddress::EMPTY).await?;

        let mut counter = 0u32;
        while !current.is_empty() {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(
                    "loop detected deleting secondary index nodes",
                ));
            }
            counter += 1;

            let node = self.get_node(current).await?;
            let next = node.next_node();
            self.delete_single_node(node).await?;
            current = next;
        }

        Ok(())
    }

    /// Unlinks one node on all its levels and releases its segment.
    async fn delete_single_node(&mut self, node: IndexNode) -> Result<()> {
        for level in (0..node.levels()).rev() {
            let prev = node.get_prev(level);
            let next = node.get_next(level);

            if !prev.is_empty() {
                self.set_node_next(prev, level, next).await?;
            }
            if !next.is_empty() {
                self.set_node_prev(next, level, prev).await?;
            }
        }

        let position = node.position();
        let index_name = self.slot_index_name(node.slot())?;

        self.snapshot
            .get_index_page(position.page_id())
            .await?
            .delete_index_node(position.index());

        self.snapshot
            .add_or_remove_free_index_list(position.page_id(), &index_name, MAX_INDEX_LENGTH)
            .await?;

        Ok(())
    }

    fn slot_index_name(&self, slot: u8) -> Result<String> {
        self.snapshot
            .collection_page()
            .unwrap()
            .get_collection_indexes()
            .find(|index| index.slot() == slot)
            .map(|index| index.name().to_string())
            .ok_or_else(|| Error::invalid_datafile_state(format!("unknown index slot {slot}")))
    }

    /// First node with `key`, or the next/previous sibling when
    /// `sibling` and no exact match exists.
    pub async fn find(
        &mut self,
        index_name: &str,
        key: &bson::Value,
        sibling: bool,
        order: Order,
    ) -> Result<Option<IndexNode>> {
        let (start, _) = self.sentinels(index_name, order)?;

        let mut left = self.get_node(start).await?;
        let mut counter = 0u32;

        for level in (0..MAX_LEVEL_LENGTH).rev() {
            let mut right_address = left.get_next_prev(level, order);

            loop {
                if counter > self.max_item_count {
                    return Err(Error::invalid_datafile_state(format!(
                        "loop detected searching index {index_name}"
                    )));
                }
                counter += 1;

                let right = self.get_node(right_address).await?;
                let diff = self.collation.compare(right.key(), key);

                if diff == Ordering::Equal {
                    return Ok(Some(right));
                }

                if order.is_past(diff) {
                    if level == 0 && sibling {
                        // no exact match; the neighbor in scan order
                        if matches!(
                            right.key(),
                            bson::Value::MinValue | bson::Value::MaxValue
                        ) {
                            return Ok(None);
                        }
                        return Ok(Some(right));
                    }
                    break; // descend one level
                }

                right_address = right.get_next_prev(level, order);
                left = right;
            }
        }

        Ok(None)
    }

    fn sentinels(&self, index_name: &str, order: Order) -> Result<(PageAddress, PageAddress)> {
        let index = self
            .snapshot
            .collection_page()
            .unwrap()
            .get_collection_index(index_name)
            .ok_or_else(|| Error::index_not_found(self.snapshot.collection_name(), index_name))?;
        Ok(match order {
            Order::Ascending => (index.head(), index.tail()),
            Order::Descending => (index.tail(), index.head()),
        })
    }

    /// First real node in scan order, or `None` on an empty index.
    pub async fn first(&mut self, index_name: &str, order: Order) -> Result<Option<IndexNode>> {
        let (start, _) = self.sentinels(index_name, order)?;
        let node = self.get_node(start).await?;
        self.next(&node, order).await
    }

    /// Scan-order successor, stopping before the sentinel.
    pub async fn next(&mut self, node: &IndexNode, order: Order) -> Result<Option<IndexNode>> {
        let next = node.get_next_prev(0, order);
        if next.is_empty() {
            return Ok(None);
        }

        let next = self.get_node(next).await?;
        if matches!(next.key(), bson::Value::MinValue | bson::Value::MaxValue) {
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Every node of the index in scan order. (Bounded scans early-out in
    /// the caller; the skiplist only knows its level-0 chain.)
    pub async fn find_all(&mut self, index_name: &str, order: Order) -> Result<Vec<IndexNode>> {
        let mut nodes = Vec::new();
        let mut current = self.first(index_name, order).await?;
        let mut counter = 0u32;

        while let Some(node) = current {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(format!(
                    "loop detected scanning index {index_name}"
                )));
            }
            counter += 1;

            current = self.next(&node, order).await?;
            nodes.push(node);
        }

        Ok(nodes)
    }

    /// Removes a whole index: every document chain forgets the slot's
    /// nodes, then the node storage is released and the catalog entry
    /// dropped.
    pub async fn drop_index(&mut self, index_name: &str) -> Result<()> {
        let slot = self.index_slot(index_name)?;
        let pk_name = "_id".to_string();

        if index_name == pk_name {
            return Err(Error::new(
                crate::ErrorKind::IndexNotFound,
                "the _id index cannot be dropped",
            ));
        }

        // unlink the slot's nodes from each document's node chain
        let pk_nodes = self.find_all(&pk_name, Order::Ascending).await?;
        for pk_node in &pk_nodes {
            let mut prev_position = pk_node.position();
            let mut current = pk_node.next_node();

            while !current.is_empty() {
                let node = self.get_node(current).await?;
                let next = node.next_node();

                if node.slot() == slot {
                    self.set_node_next_node(prev_position, next).await?;
                    self.delete_single_node(node).await?;
                } else {
                    prev_position = current;
                }

                current = next;
            }
        }

        // sentinel nodes and their page space
        let (head, tail) = self.sentinels(index_name, Order::Ascending)?;
        for position in [head, tail] {
            let page_id = position.page_id();
            self.snapshot
                .get_index_page(page_id)
                .await?
                .delete_index_node(position.index());
            self.snapshot
                .add_or_remove_free_index_list(page_id, index_name, MAX_INDEX_LENGTH)
                .await?;
        }

        self.snapshot
            .collection_page_mut()
            .unwrap()
            .delete_collection_index(index_name);

        log::debug!("dropped index {index_name}");

        Ok(())
    }
}

/// Expands an index expression result into its key set: array values
/// index each distinct element (multi-key), everything else indexes as a
/// single key.
pub(crate) fn expand_keys(value: &bson::Value) -> Vec<bson::Value> {
    match value {
        bson::Value::Array(array) => {
            let mut keys: Vec<bson::Value> = Vec::with_capacity(array.len());
            for item in array.iter() {
                if !keys.contains(item) {
                    keys.push(item.clone());
                }
            }
            keys
        }
        other => vec![other.clone()],
    }
}
