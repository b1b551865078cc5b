use crate::bson;
use crate::engine::index_node::{
    self, IndexNode, calc_key_offset, calc_next_offset, calc_prev_offset,
};
use crate::engine::pages::{BasePage, PageType};
use crate::engine::{PageAddress, PageBuffer};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// Longest node a page must fit before it leaves the free list.
pub(crate) const MAX_INDEX_LENGTH: usize = 1400;

/// Slotted page of skiplist nodes.
pub(crate) struct IndexPage {
    base: BasePage,
}

impl IndexPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        IndexPage {
            base: BasePage::new(buffer, page_id, PageType::Index),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;
        if base.page_type() != PageType::Index {
            return Err(Error::invalid_page_type(
                PageType::Index,
                base.page_type(),
                base.page_id(),
            ));
        }
        Ok(IndexPage { base })
    }

    pub fn get_index_node(&self, index: u8) -> Result<IndexNode> {
        IndexNode::load(self.page_id(), index, self.get(index))
    }

    pub fn insert_index_node(
        &mut self,
        slot: u8,
        levels: u8,
        key: &bson::Value,
        data_block: PageAddress,
        length: usize,
    ) -> Result<IndexNode> {
        let page_id = self.page_id();
        let (segment, index) = self.base.insert(length);

        segment.write_u8(IndexNode::P_SLOT, slot);
        segment.write_u8(IndexNode::P_LEVELS, levels);
        segment.write_page_address(IndexNode::P_DATA_BLOCK, data_block);
        segment.write_page_address(IndexNode::P_NEXT_NODE, PageAddress::EMPTY);

        for level in 0..levels {
            segment.write_page_address(calc_prev_offset(level), PageAddress::EMPTY);
            segment.write_page_address(calc_next_offset(level), PageAddress::EMPTY);
        }

        index_node::write_index_key(segment, calc_key_offset(levels), key);

        IndexNode::load(page_id, index, self.get(index))
    }

    pub fn set_node_prev(&mut self, index: u8, level: u8, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(calc_prev_offset(level), address);
    }

    pub fn set_node_next(&mut self, index: u8, level: u8, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(calc_next_offset(level), address);
    }

    pub fn set_node_next_node(&mut self, index: u8, address: PageAddress) {
        self.base
            .get_mut(index)
            .write_page_address(IndexNode::P_NEXT_NODE, address);
    }

    pub fn delete_index_node(&mut self, index: u8) {
        self.base.delete(index);
    }

    pub fn get_index_nodes(&self) -> impl Iterator<Item = Result<IndexNode>> {
        self.base
            .get_used_indices()
            .map(|index| self.get_index_node(index))
    }

    /// Index pages use two buckets only: roomy enough for any node, or
    /// effectively full.
    pub fn free_index_slot(free_bytes: usize) -> u8 {
        if free_bytes >= MAX_INDEX_LENGTH { 0 } else { 1 }
    }

    pub fn into_base(self) -> BasePage {
        self.base
    }
}

impl Deref for IndexPage {
    type Target = BasePage;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for IndexPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Value;

    #[test]
    fn node_roundtrip() {
        let mut page = IndexPage::new(Box::new(PageBuffer::new()), 6);

        let key = Value::String("alpha".into());
        let length = IndexNode::get_node_length(3, &key).unwrap();
        let node = page
            .insert_index_node(1, 3, &key, PageAddress::new(9, 2), length)
            .unwrap();

        assert_eq!(node.levels(), 3);
        assert_eq!(node.slot(), 1);
        assert_eq!(node.key(), &key);
        assert_eq!(node.data_block(), PageAddress::new(9, 2));
        assert!(node.get_prev(0).is_empty());

        let position = node.position();
        page.set_node_next(position.index(), 1, PageAddress::new(7, 7));
        page.set_node_next_node(position.index(), PageAddress::new(8, 8));

        let reloaded = page.get_index_node(position.index()).unwrap();
        assert_eq!(reloaded.get_next(1), PageAddress::new(7, 7));
        assert_eq!(reloaded.next_node(), PageAddress::new(8, 8));
        assert!(reloaded.get_next(0).is_empty());
    }
}
