use crate::engine::index_service::IndexService;
use crate::engine::pages::HeaderPage;
use crate::engine::snapshot::Snapshot;
use crate::engine::{PageType, StreamFactory};
use crate::utils::{Collation, StrExtension};
use crate::{Error, Result};

/// Creates and validates collections on top of a write snapshot.
pub(crate) struct CollectionService<'snapshot, SF: StreamFactory> {
    snapshot: &'snapshot mut Snapshot<SF>,
}

impl<'snapshot, SF: StreamFactory> CollectionService<'snapshot, SF> {
    pub fn new(snapshot: &'snapshot mut Snapshot<SF>) -> Self {
        Self { snapshot }
    }

    pub fn check_name(name: &str, header: &HeaderPage) -> Result<()> {
        if name.len() > header.get_available_collection_space() {
            return Err(Error::name_length_header_space(name));
        }
        if !name.is_word() || name.starts_with('$') {
            return Err(Error::invalid_collection_name(name));
        }
        Ok(())
    }

    /// Creates the collection this snapshot points at: catalog page, `_id`
    /// index, and a deferred header directory entry.
    pub async fn add(&mut self, name: &str, collation: Collation, max_item_count: u32) -> Result<()> {
        debug_assert!(self.snapshot.collection_page().is_none());

        Self::check_name(name, &self.snapshot.header().borrow())?;

        let page_id = self.snapshot.new_page(PageType::Collection).await?;

        // the directory lives in the header page, which is only written at
        // commit; defer the entry to that point
        self.snapshot.trans_pages().borrow_mut().on_commit({
            let name = name.to_string();
            move |header| header.insert_collection(&name, page_id)
        });

        let mut indexer = IndexService::new(self.snapshot, collation, max_item_count);
        indexer.create_index("_id", "$._id", true).await?;

        log::debug!("created collection {name} (page {page_id})");

        Ok(())
    }
}
