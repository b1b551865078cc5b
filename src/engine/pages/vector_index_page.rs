use crate::engine::pages::{BasePage, PageType};
use crate::engine::vector_node::{
    VectorNode, calc_neighbor_offset, calc_vector_offset, vector_node_length,
};
use crate::engine::{PageAddress, PageBuffer};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// Slotted page of vector graph nodes; structural sibling of
/// [`IndexPage`](super::IndexPage).
pub(crate) struct VectorIndexPage {
    base: BasePage,
}

impl VectorIndexPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        VectorIndexPage {
            base: BasePage::new(buffer, page_id, PageType::VectorIndex),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;
        if base.page_type() != PageType::VectorIndex {
            return Err(Error::invalid_page_type(
                PageType::VectorIndex,
                base.page_type(),
                base.page_id(),
            ));
        }
        Ok(VectorIndexPage { base })
    }

    pub fn get_vector_node(&self, index: u8) -> Result<VectorNode> {
        VectorNode::load(self.page_id(), index, self.get(index))
    }

    pub fn insert_vector_node(
        &mut self,
        levels: u8,
        vector: &[f32],
        data_block: PageAddress,
    ) -> Result<VectorNode> {
        let page_id = self.page_id();
        let length = vector_node_length(levels, vector.len() as u16);
        let (segment, index) = self.base.insert(length);

        segment.write_u8(VectorNode::P_LEVELS, levels);
        segment.write_page_address(VectorNode::P_DATA_BLOCK, data_block);
        segment.write_page_address(VectorNode::P_NEXT_NODE, PageAddress::EMPTY);

        for level in 0..levels {
            for i in 0..crate::engine::MAX_NEIGHBORS_PER_LEVEL {
                segment.write_page_address(calc_neighbor_offset(level, i), PageAddress::EMPTY);
            }
        }

        let vector_offset = calc_vector_offset(levels);
        segment.write_u16(vector_offset, vector.len() as u16);
        for (i, value) in vector.iter().enumerate() {
            segment.write_f32(vector_offset + 2 + i * 4, *value);
        }

        VectorNode::load(page_id, index, self.get(index))
    }

    pub fn set_node_neighbor(
        &mut self,
        index: u8,
        level: u8,
        position: usize,
        address: PageAddress,
    ) {
        self.base
            .get_mut(index)
            .write_page_address(calc_neighbor_offset(level, position), address);
    }

    pub fn set_node_next_node(&mut self, index: u8, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(VectorNode::P_NEXT_NODE, address);
    }

    pub fn delete_vector_node(&mut self, index: u8) {
        self.base.delete(index);
    }

    /// Two buckets, like index pages: roomy for any node of this index,
    /// or full.
    pub fn free_index_slot(free_bytes: usize, max_node_length: usize) -> u8 {
        if free_bytes >= max_node_length + BasePage::SLOT_SIZE {
            0
        } else {
            1
        }
    }

    pub fn into_base(self) -> BasePage {
        self.base
    }
}

impl Deref for VectorIndexPage {
    type Target = BasePage;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for VectorIndexPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_roundtrip() {
        let mut page = VectorIndexPage::new(Box::new(PageBuffer::new()), 12);

        let node = page
            .insert_vector_node(2, &[1.0, -0.5, 3.25], PageAddress::new(4, 1))
            .unwrap();
        assert_eq!(node.levels(), 2);
        assert_eq!(node.vector(), &[1.0, -0.5, 3.25]);
        assert_eq!(node.neighbors(0).count(), 0);
        assert_eq!(node.free_neighbor_slot(1), Some(0));

        let index = node.position().index();
        page.set_node_neighbor(index, 1, 0, PageAddress::new(12, 9));
        page.set_node_next_node(index, PageAddress::new(13, 0));

        let reloaded = page.get_vector_node(index).unwrap();
        assert_eq!(reloaded.neighbors(1).collect::<Vec<_>>(), vec![
            PageAddress::new(12, 9)
        ]);
        assert_eq!(reloaded.free_neighbor_slot(1), Some(1));
        assert_eq!(reloaded.next_node(), PageAddress::new(13, 0));
        assert_eq!(reloaded.data_block(), PageAddress::new(4, 1));
    }
}
