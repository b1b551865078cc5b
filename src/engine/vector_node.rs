use crate::engine::{MAX_NEIGHBORS_PER_LEVEL, MAX_VECTOR_LEVELS, PageAddress};
use crate::utils::BufferSlice;
use crate::{Error, Result};

// segment layout of one vector graph node
const P_LEVELS: usize = 0; // 00-00 [u8]
const P_DATA_BLOCK: usize = 1; // 01-05 [PageAddress]
const P_NEXT_NODE: usize = 6; // 06-10 [PageAddress] insertion-order chain
const P_NEIGHBORS: usize = 11; // 11-.. neighbors × levels
const VECTOR_NODE_FIXED_SIZE: usize = 1 + PageAddress::SERIALIZED_SIZE * 2;

const NEIGHBORS_BYTES_PER_LEVEL: usize = MAX_NEIGHBORS_PER_LEVEL * PageAddress::SERIALIZED_SIZE;

pub(crate) fn calc_neighbor_offset(level: u8, position: usize) -> usize {
    P_NEIGHBORS
        + level as usize * NEIGHBORS_BYTES_PER_LEVEL
        + position * PageAddress::SERIALIZED_SIZE
}

pub(crate) fn calc_vector_offset(levels: u8) -> usize {
    P_NEIGHBORS + levels as usize * NEIGHBORS_BYTES_PER_LEVEL
}

/// Segment length of a node with `levels` and `dims`.
pub(crate) fn vector_node_length(levels: u8, dims: u16) -> usize {
    VECTOR_NODE_FIXED_SIZE + levels as usize * NEIGHBORS_BYTES_PER_LEVEL + 2 + dims as usize * 4
}

/// The longest node this index can produce (maximum level).
pub(crate) fn max_vector_node_length(dims: u16) -> usize {
    vector_node_length(MAX_VECTOR_LEVELS, dims)
}

/// Owned view of one vector graph node: the embedding plus up to 8
/// neighbor links per level and the insertion-order chain link.
#[derive(Debug, Clone)]
pub(crate) struct VectorNode {
    position: PageAddress,
    levels: u8,
    data_block: PageAddress,
    next_node: PageAddress,
    neighbors: Vec<Vec<PageAddress>>,
    vector: Vec<f32>,
}

impl VectorNode {
    pub const P_LEVELS: usize = P_LEVELS;
    pub const P_DATA_BLOCK: usize = P_DATA_BLOCK;
    pub const P_NEXT_NODE: usize = P_NEXT_NODE;

    pub fn load(page_id: u32, index: u8, segment: &BufferSlice) -> Result<Self> {
        let levels = segment.read_u8(P_LEVELS);
        if levels == 0 || levels > MAX_VECTOR_LEVELS {
            return Err(Error::invalid_page());
        }

        let data_block = segment.read_page_address(P_DATA_BLOCK);
        let next_node = segment.read_page_address(P_NEXT_NODE);

        let mut neighbors = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            let mut per_level = Vec::with_capacity(MAX_NEIGHBORS_PER_LEVEL);
            for i in 0..MAX_NEIGHBORS_PER_LEVEL {
                per_level.push(segment.read_page_address(calc_neighbor_offset(level, i)));
            }
            neighbors.push(per_level);
        }

        let vector_offset = calc_vector_offset(levels);
        let dims = segment.read_u16(vector_offset) as usize;
        let mut vector = Vec::with_capacity(dims);
        for i in 0..dims {
            vector.push(segment.read_f32(vector_offset + 2 + i * 4));
        }

        Ok(VectorNode {
            position: PageAddress::new(page_id, index),
            levels,
            data_block,
            next_node,
            neighbors,
            vector,
        })
    }

    pub fn position(&self) -> PageAddress {
        self.position
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn data_block(&self) -> PageAddress {
        self.data_block
    }

    pub fn next_node(&self) -> PageAddress {
        self.next_node
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Live neighbor addresses at `level`.
    pub fn neighbors(&self, level: u8) -> impl Iterator<Item = PageAddress> + '_ {
        self.neighbors[level as usize]
            .iter()
            .copied()
            .filter(|address| !address.is_empty())
    }

    /// Slot of the first empty neighbor entry at `level`, if any.
    pub fn free_neighbor_slot(&self, level: u8) -> Option<usize> {
        self.neighbors[level as usize]
            .iter()
            .position(PageAddress::is_empty)
    }

    pub fn neighbor_at(&self, level: u8, position: usize) -> PageAddress {
        self.neighbors[level as usize][position]
    }
}
