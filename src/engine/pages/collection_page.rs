use crate::engine::buffer_reader::BufferReader;
use crate::engine::buffer_writer::BufferWriter;
use crate::engine::collection_index::{CollectionIndex, IndexType};
use crate::engine::pages::{BasePage, PageType};
use crate::engine::{
    MAX_INDEXES_PER_COLLECTION, PAGE_FREE_LIST_SLOTS, PAGE_HEADER_SIZE, PAGE_SIZE, PageBuffer,
};
use crate::{Error, Result};
use std::collections::HashMap;

const P_INDEXES: usize = 96; // 96..PAGE_SIZE: index catalog
const INDEXES_AREA: usize = PAGE_SIZE - P_INDEXES;

pub(crate) type FreeDataPageList = [u32; PAGE_FREE_LIST_SLOTS];

/// Per-collection catalog page: free-data-page buckets plus up to 255
/// index definitions. Not slotted; the whole content area is the catalog.
pub(crate) struct CollectionPage {
    base: BasePage,

    pub free_data_page_list: FreeDataPageList,
    indexes: HashMap<String, CollectionIndex>,
}

impl CollectionPage {
    pub fn new(buffer: Box<PageBuffer>, page_id: u32) -> Self {
        Self {
            base: BasePage::new(buffer, page_id, PageType::Collection),
            free_data_page_list: [u32::MAX; PAGE_FREE_LIST_SLOTS],
            indexes: HashMap::new(),
        }
    }

    pub fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let base = BasePage::load(buffer)?;

        if base.page_type() != PageType::Collection {
            return Err(Error::invalid_page_type(
                PageType::Collection,
                base.page_type(),
                base.page_id(),
            ));
        }

        let mut free_data_page_list = [u32::MAX; PAGE_FREE_LIST_SLOTS];
        let mut indexes = HashMap::new();

        let area = base
            .buffer()
            .slice(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        let mut reader = BufferReader::single(area);

        for item in free_data_page_list.iter_mut() {
            *item = reader.read_u32();
        }

        reader.skip(P_INDEXES - PAGE_HEADER_SIZE - reader.position());

        let count: usize = reader.read_u8().into();
        for _ in 0..count {
            let index = CollectionIndex::load(&mut reader)?;
            indexes.insert(index.name().to_string(), index);
        }

        Ok(Self {
            base,
            free_data_page_list,
            indexes,
        })
    }

    pub fn update_buffer(&mut self) -> &PageBuffer {
        if self.base.page_type() == PageType::Empty {
            // dropped collection: only the bare header remains
            return self.base.update_buffer();
        }

        let area = self
            .base
            .buffer_mut()
            .slice_mut(PAGE_HEADER_SIZE, PAGE_SIZE - PAGE_HEADER_SIZE);
        let mut writer = BufferWriter::single(area);

        for i in 0..PAGE_FREE_LIST_SLOTS {
            writer.write_u32(self.free_data_page_list[i]);
        }

        writer.skip(P_INDEXES - PAGE_HEADER_SIZE - writer.position());

        writer.write_u8(self.indexes.len() as u8);
        for index in self.indexes.values() {
            index.update_buffer(&mut writer);
        }

        self.base.update_buffer()
    }

    pub fn as_base(&self) -> &BasePage {
        &self.base
    }

    pub fn as_base_mut(&mut self) -> &mut BasePage {
        &mut self.base
    }

    pub fn page_id(&self) -> u32 {
        self.base.page_id()
    }

    pub fn set_dirty(&mut self) {
        self.base.set_dirty();
    }

    pub fn is_dirty(&self) -> bool {
        self.base.is_dirty()
    }

    pub fn into_base(self) -> BasePage {
        self.base
    }

    /// The `_id` index always exists on a live collection.
    pub fn pk_index(&self) -> &CollectionIndex {
        &self.indexes["_id"]
    }

    pub fn get_collection_index(&self, name: &str) -> Option<&CollectionIndex> {
        self.indexes.get(name)
    }

    pub fn get_collection_index_mut(&mut self, name: &str) -> Option<&mut CollectionIndex> {
        self.base.set_dirty();
        self.indexes.get_mut(name)
    }

    pub fn get_collection_indexes(&self) -> impl Iterator<Item = &CollectionIndex> {
        self.indexes.values()
    }

    pub fn insert_collection_index(
        &mut self,
        name: &str,
        index_type: IndexType,
        expression: &str,
        unique: bool,
    ) -> Result<&mut CollectionIndex> {
        let total_length = 1
            + self
                .indexes
                .values()
                .map(CollectionIndex::get_length)
                .sum::<usize>()
            + CollectionIndex::get_length_static(name, expression);

        if self.indexes.len() >= MAX_INDEXES_PER_COLLECTION || total_length >= INDEXES_AREA {
            return Err(Error::collection_index_limit_reached());
        }

        let next_slot = self
            .indexes
            .values()
            .map(|x| x.slot())
            .max()
            .map(|x| x + 1)
            .unwrap_or(0);

        let index = CollectionIndex::new(
            next_slot,
            index_type,
            name.to_string(),
            expression.to_string(),
            unique,
        );

        self.base.set_dirty();
        Ok(self.indexes.entry(name.to_string()).insert_entry(index).into_mut())
    }

    pub fn delete_collection_index(&mut self, name: &str) {
        self.indexes.remove(name);
        self.base.set_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PageAddress;

    #[test]
    fn catalog_roundtrip() {
        let mut page = CollectionPage::new(Box::new(PageBuffer::new()), 4);
        page.free_data_page_list[2] = 99;

        let index = page
            .insert_collection_index("_id", IndexType::Ordered, "$._id", true)
            .unwrap();
        index.set_head(PageAddress::new(5, 0));
        index.set_tail(PageAddress::new(5, 1));

        let vector = page
            .insert_collection_index("embedding", IndexType::Vector, "$.embedding", false)
            .unwrap();
        vector.set_dims(2);
        vector.set_metric(crate::engine::VectorDistanceMetric::Euclidean);
        vector.set_node_count(3);

        page.update_buffer();
        let loaded = CollectionPage::load(page.into_base().into_buffer()).unwrap();

        assert_eq!(loaded.free_data_page_list[2], 99);
        assert_eq!(loaded.pk_index().head(), PageAddress::new(5, 0));
        assert_eq!(loaded.pk_index().slot(), 0);
        assert!(loaded.pk_index().unique());

        let vector = loaded.get_collection_index("embedding").unwrap();
        assert_eq!(vector.slot(), 1);
        assert_eq!(vector.index_type(), IndexType::Vector);
        assert_eq!(vector.dims(), 2);
        assert_eq!(vector.node_count(), 3);
    }

    #[test]
    fn wrong_page_type_is_rejected() {
        let page = BasePage::new(Box::new(PageBuffer::new()), 8, PageType::Data);
        let mut page = page;
        page.update_buffer();
        assert!(CollectionPage::load(page.into_buffer()).is_err());
    }
}
