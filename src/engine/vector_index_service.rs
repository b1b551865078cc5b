use crate::engine::collection_index::{IndexType, VectorDistanceMetric};
use crate::engine::snapshot::Snapshot;
use crate::engine::vector_node::{VectorNode, max_vector_node_length};
use crate::engine::{
    BasePage, MAX_NEIGHBORS_PER_LEVEL, MAX_VECTOR_LEVELS, PAGE_HEADER_SIZE, PAGE_SIZE,
    PageAddress, PageType, StreamFactory, VECTOR_FULL_SCAN_LIMIT,
};
use crate::{Error, Result};
use itertools::Itertools;

/// Vector graph operations over one snapshot.
///
/// Build policy: each node samples a level count (geometric, cap 4) and
/// connects to at most 8 nearest neighbors per level, bidirectionally;
/// when a neighbor list overflows, its farthest entry is dropped. The
/// catalog entry tracks the entry node (highest level wins), the head of
/// an insertion-order chain through every node, and the node count.
/// Searches run an exact scan over that chain while the graph holds at
/// most `VECTOR_FULL_SCAN_LIMIT` nodes; larger graphs use greedy descent
/// plus best-first expansion at the ground level.
pub(crate) struct VectorIndexService<'snapshot, SF: StreamFactory> {
    snapshot: &'snapshot mut Snapshot<SF>,
    max_item_count: u32,
}

struct VectorIndexState {
    entry: PageAddress,
    chain: PageAddress,
    node_count: u32,
    dims: u16,
    metric: VectorDistanceMetric,
    free_list: u32,
}

impl<'snapshot, SF: StreamFactory> VectorIndexService<'snapshot, SF> {
    pub fn new(snapshot: &'snapshot mut Snapshot<SF>, max_item_count: u32) -> Self {
        Self {
            snapshot,
            max_item_count,
        }
    }

    fn flip_coin() -> u8 {
        let mut levels = 1;
        while rand::random_bool(0.5) && levels < MAX_VECTOR_LEVELS {
            levels += 1;
        }
        levels
    }

    fn state(&self, index_name: &str) -> Result<VectorIndexState> {
        let index = self
            .snapshot
            .collection_page()
            .unwrap()
            .get_collection_index(index_name)
            .ok_or_else(|| Error::index_not_found(self.snapshot.collection_name(), index_name))?;

        if index.index_type() != IndexType::Vector {
            return Err(Error::index_not_found(
                self.snapshot.collection_name(),
                index_name,
            ));
        }

        Ok(VectorIndexState {
            entry: index.head(),
            chain: index.tail(),
            node_count: index.node_count(),
            dims: index.dims(),
            metric: index.metric(),
            free_list: index.free_index_page_list(),
        })
    }

    fn store_state(&mut self, index_name: &str, state: &VectorIndexState) {
        let collection_page = self.snapshot.collection_page_mut().unwrap();
        let index = collection_page.get_collection_index_mut(index_name).unwrap();
        index.set_head(state.entry);
        index.set_tail(state.chain);
        index.set_node_count(state.node_count);
        collection_page.set_dirty();
    }

    /// Creates the catalog entry for a vector index.
    pub fn create_vector_index(
        &mut self,
        index_name: &str,
        expression: &str,
        dims: u16,
        metric: VectorDistanceMetric,
    ) -> Result<()> {
        if dims == 0
            || max_vector_node_length(dims)
                > PAGE_SIZE - PAGE_HEADER_SIZE - BasePage::SLOT_SIZE
        {
            return Err(Error::invalid_vector_dimensions(dims, dims as usize));
        }

        let collection_page = self.snapshot.collection_page_mut().unwrap();
        let index = collection_page.insert_collection_index(
            index_name,
            IndexType::Vector,
            expression,
            false,
        )?;
        index.set_dims(dims);
        index.set_metric(metric);

        log::debug!("created vector index {index_name} ({dims} dims, {metric:?})");

        Ok(())
    }

    async fn get_node(&mut self, address: PageAddress) -> Result<VectorNode> {
        self.snapshot
            .get_vector_page(address.page_id())
            .await?
            .get_vector_node(address.index())
    }

    async fn set_neighbor(
        &mut self,
        address: PageAddress,
        level: u8,
        position: usize,
        target: PageAddress,
    ) -> Result<()> {
        self.snapshot
            .get_vector_page(address.page_id())
            .await?
            .set_node_neighbor(address.index(), level, position, target);
        Ok(())
    }

    /// Every node of the index in insertion order (the chain is stored
    /// newest-first, so the scan order is reversed before returning).
    async fn scan_chain(&mut self, state: &VectorIndexState) -> Result<Vec<VectorNode>> {
        let mut nodes = Vec::with_capacity(state.node_count as usize);
        let mut current = state.chain;
        let mut counter = 0u32;

        while !current.is_empty() {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(
                    "loop detected scanning vector node chain",
                ));
            }
            counter += 1;

            let node = self.get_node(current).await?;
            current = node.next_node();
            nodes.push(node);
        }

        nodes.reverse();
        Ok(nodes)
    }

    /// Inserts one embedding. Returns the new node's address.
    pub async fn add_node(
        &mut self,
        index_name: &str,
        vector: &[f32],
        data_block: PageAddress,
    ) -> Result<PageAddress> {
        let mut state = self.state(index_name)?;

        if vector.len() != state.dims as usize {
            return Err(Error::invalid_vector_dimensions(state.dims, vector.len()));
        }

        let levels = Self::flip_coin();
        let max_node_length = max_vector_node_length(state.dims);

        let page_id = self
            .snapshot
            .get_free_index_page(PageType::VectorIndex, state.free_list)
            .await?;
        let node_position = {
            let page = self.snapshot.get_vector_page(page_id).await?;
            page.insert_vector_node(levels, vector, data_block)?.position()
        };

        self.snapshot
            .add_or_remove_free_index_list(page_id, index_name, max_node_length)
            .await?;

        // chain in (newest first) and keep the entry at the tallest node
        if !state.chain.is_empty() {
            self.snapshot
                .get_vector_page(node_position.page_id())
                .await?
                .set_node_next_node(node_position.index(), state.chain);
        }
        state.chain = node_position;
        state.node_count += 1;

        if state.entry.is_empty() {
            state.entry = node_position;
            self.store_state(index_name, &state);
            return Ok(node_position);
        }

        // connect each level to its nearest candidates
        let candidates = self.collect_candidates(&state, vector).await?;
        for level in 0..levels {
            let eligible = candidates
                .iter()
                .filter(|(node, _)| node.levels() > level && node.position() != node_position)
                .take(MAX_NEIGHBORS_PER_LEVEL)
                .map(|(node, distance)| (node.position(), *distance))
                .collect::<Vec<_>>();

            for (slot, &(neighbor, _)) in eligible.iter().enumerate() {
                self.set_neighbor(node_position, level, slot, neighbor).await?;
                self.link_back(&state, neighbor, level, node_position, vector)
                    .await?;
            }
        }

        if levels > self.get_node(state.entry).await?.levels() {
            state.entry = node_position;
        }

        self.store_state(index_name, &state);
        Ok(node_position)
    }

    /// Nearest candidates for connecting a new node, sorted by distance.
    async fn collect_candidates(
        &mut self,
        state: &VectorIndexState,
        vector: &[f32],
    ) -> Result<Vec<(VectorNode, f64)>> {
        let nodes = if state.node_count <= VECTOR_FULL_SCAN_LIMIT {
            self.scan_chain(state).await?
        } else {
            self.best_first(state, vector, 4 * MAX_NEIGHBORS_PER_LEVEL)
                .await?
        };

        Ok(nodes
            .into_iter()
            .map(|node| {
                let distance = state.metric.distance(vector, node.vector());
                (node, distance)
            })
            .sorted_by(|a, b| a.1.total_cmp(&b.1))
            .collect())
    }

    /// Makes `neighbor` point back at `node`, dropping its farthest link
    /// when the list is full and the new one is closer.
    async fn link_back(
        &mut self,
        state: &VectorIndexState,
        neighbor: PageAddress,
        level: u8,
        node: PageAddress,
        node_vector: &[f32],
    ) -> Result<()> {
        let neighbor_node = self.get_node(neighbor).await?;

        if let Some(slot) = neighbor_node.free_neighbor_slot(level) {
            return self.set_neighbor(neighbor, level, slot, node).await;
        }

        // full: replace the farthest entry if the new node is closer
        let mut farthest: Option<(usize, f64)> = None;
        for slot in 0..MAX_NEIGHBORS_PER_LEVEL {
            let existing = neighbor_node.neighbor_at(level, slot);
            let existing_node = self.get_node(existing).await?;
            let distance = state
                .metric
                .distance(neighbor_node.vector(), existing_node.vector());
            if farthest.is_none_or(|(_, far)| distance > far) {
                farthest = Some((slot, distance));
            }
        }

        let new_distance = state.metric.distance(neighbor_node.vector(), node_vector);
        if let Some((slot, far)) = farthest {
            if new_distance < far {
                self.set_neighbor(neighbor, level, slot, node).await?;
            }
        }

        Ok(())
    }

    /// Greedy descent from the entry node, then bounded best-first
    /// expansion at level 0. Returns the visited set.
    async fn best_first(
        &mut self,
        state: &VectorIndexState,
        target: &[f32],
        expansions: usize,
    ) -> Result<Vec<VectorNode>> {
        let mut current = self.get_node(state.entry).await?;
        let mut current_distance = state.metric.distance(target, current.vector());

        // descend: move greedily while any upper-level neighbor is closer
        let top = current.levels();
        for level in (1..top).rev() {
            loop {
                // a greedy hop may land on a node shorter than this level
                if level >= current.levels() {
                    break;
                }
                let mut improved = false;
                for neighbor in current.neighbors(level).collect::<Vec<_>>() {
                    let candidate = self.get_node(neighbor).await?;
                    let distance = state.metric.distance(target, candidate.vector());
                    if distance < current_distance {
                        current = candidate;
                        current_distance = distance;
                        improved = true;
                        break;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        // ground level: best-first over a visited set
        let mut visited: Vec<VectorNode> = Vec::new();
        let mut visited_positions: Vec<PageAddress> = Vec::new();
        let mut frontier: Vec<(PageAddress, f64)> =
            vec![(current.position(), current_distance)];

        while let Some(best) = frontier
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(i, _)| i)
        {
            if visited.len() >= expansions {
                break;
            }

            let (position, _) = frontier.swap_remove(best);
            if visited_positions.contains(&position) {
                continue;
            }

            let node = self.get_node(position).await?;
            for neighbor in node.neighbors(0).collect::<Vec<_>>() {
                if !visited_positions.contains(&neighbor) {
                    let candidate = self.get_node(neighbor).await?;
                    let distance = state.metric.distance(target, candidate.vector());
                    frontier.push((neighbor, distance));
                }
            }

            visited_positions.push(position);
            visited.push(node);
        }

        Ok(visited)
    }

    /// `k` nearest data blocks within `max_distance`, nearest first; ties
    /// resolve by insertion order.
    pub async fn search(
        &mut self,
        index_name: &str,
        target: &[f32],
        k: usize,
        max_distance: f64,
    ) -> Result<Vec<(PageAddress, f64)>> {
        let state = self.state(index_name)?;

        if target.len() != state.dims as usize {
            return Err(Error::invalid_vector_dimensions(state.dims, target.len()));
        }
        if state.node_count == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let nodes = if state.node_count <= VECTOR_FULL_SCAN_LIMIT {
            self.scan_chain(&state).await?
        } else {
            self.best_first(&state, target, k.saturating_mul(4).max(32)).await?
        };

        Ok(nodes
            .into_iter()
            .map(|node| {
                let distance = state.metric.distance(target, node.vector());
                (node.data_block(), distance)
            })
            .filter(|(_, distance)| *distance <= max_distance)
            .sorted_by(|a, b| a.1.total_cmp(&b.1))
            .take(k)
            .collect())
    }

    /// Removes every node of this index that points at `data_block`
    /// (document delete/update path).
    pub async fn delete_nodes_for(
        &mut self,
        index_name: &str,
        data_block: PageAddress,
    ) -> Result<()> {
        let mut state = self.state(index_name)?;
        let nodes = self.scan_chain(&state).await?;
        let max_node_length = max_vector_node_length(state.dims);

        let doomed: Vec<PageAddress> = nodes
            .iter()
            .filter(|node| node.data_block() == data_block)
            .map(|node| node.position())
            .collect();

        if doomed.is_empty() {
            return Ok(());
        }

        // scrub links to the doomed nodes from every survivor
        for node in &nodes {
            if doomed.contains(&node.position()) {
                continue;
            }
            for level in 0..node.levels() {
                for slot in 0..MAX_NEIGHBORS_PER_LEVEL {
                    if doomed.contains(&node.neighbor_at(level, slot)) {
                        self.set_neighbor(node.position(), level, slot, PageAddress::EMPTY)
                            .await?;
                    }
                }
            }
        }

        // rebuild the insertion chain without the doomed nodes
        let mut previous = PageAddress::EMPTY;
        state.chain = PageAddress::EMPTY;
        for node in nodes.iter().filter(|node| !doomed.contains(&node.position())) {
            let position = node.position();
            self.snapshot
                .get_vector_page(position.page_id())
                .await?
                .set_node_next_node(position.index(), PageAddress::EMPTY);
            if previous.is_empty() {
                // oldest surviving node ends the chain
            } else {
                self.snapshot
                    .get_vector_page(position.page_id())
                    .await?
                    .set_node_next_node(position.index(), previous);
            }
            previous = position;
            state.chain = position;
        }

        for position in &doomed {
            let page_id = position.page_id();
            self.snapshot
                .get_vector_page(page_id)
                .await?
                .delete_vector_node(position.index());
            self.snapshot
                .add_or_remove_free_index_list(page_id, index_name, max_node_length)
                .await?;
        }

        state.node_count -= doomed.len() as u32;

        // re-anchor the entry on the tallest survivor
        if doomed.contains(&state.entry) {
            state.entry = PageAddress::EMPTY;
            let mut best_levels = 0;
            for node in nodes.iter().filter(|node| !doomed.contains(&node.position())) {
                if node.levels() > best_levels {
                    best_levels = node.levels();
                    state.entry = node.position();
                }
            }
        }

        self.store_state(index_name, &state);
        Ok(())
    }

    /// Page ids of every node of the index (drop-collection discovery).
    pub async fn node_pages(&mut self, index_name: &str) -> Result<Vec<u32>> {
        let state = self.state(index_name)?;
        Ok(self
            .scan_chain(&state)
            .await?
            .iter()
            .map(|node| node.position().page_id())
            .collect())
    }

    /// Removes the whole index: node storage plus catalog entry.
    pub async fn drop_vector_index(&mut self, index_name: &str) -> Result<()> {
        let state = self.state(index_name)?;
        let nodes = self.scan_chain(&state).await?;
        let max_node_length = max_vector_node_length(state.dims);

        for node in nodes {
            let position = node.position();
            self.snapshot
                .get_vector_page(position.page_id())
                .await?
                .delete_vector_node(position.index());
            self.snapshot
                .add_or_remove_free_index_list(position.page_id(), index_name, max_node_length)
                .await?;
        }

        self.snapshot
            .collection_page_mut()
            .unwrap()
            .delete_collection_index(index_name);

        log::debug!("dropped vector index {index_name}");

        Ok(())
    }
}
