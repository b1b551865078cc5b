use crate::engine::PageAddress;
use crate::utils::BufferSlice;

// segment layout of one data block
const P_EXTEND: usize = 0; // 00-00 [u8]
const P_NEXT_BLOCK: usize = 1; // 01-05 [PageAddress]
const P_BUFFER: usize = 6; // 06-.. document bytes

/// Read view over one data block segment. `extend` marks continuation
/// blocks of a chained document.
pub(crate) struct DataBlock<'a> {
    position: PageAddress,
    extend: bool,
    next_block: PageAddress,
    buffer: &'a BufferSlice,
}

impl<'a> DataBlock<'a> {
    pub const DATA_BLOCK_FIXED_SIZE: usize = 1 + PageAddress::SERIALIZED_SIZE;
    pub const P_EXTEND: usize = P_EXTEND;
    pub const P_NEXT_BLOCK: usize = P_NEXT_BLOCK;
    pub const P_BUFFER: usize = P_BUFFER;

    pub fn load(page_id: u32, index: u8, segment: &'a BufferSlice) -> Self {
        Self {
            position: PageAddress::new(page_id, index),
            extend: segment.read_bool(P_EXTEND),
            next_block: segment.read_page_address(P_NEXT_BLOCK),
            buffer: segment.slice(P_BUFFER, segment.len() - P_BUFFER),
        }
    }

    pub fn position(&self) -> PageAddress {
        self.position
    }

    pub fn extend(&self) -> bool {
        self.extend
    }

    pub fn next_block(&self) -> PageAddress {
        self.next_block
    }

    pub fn buffer(&self) -> &BufferSlice {
        self.buffer
    }
}
