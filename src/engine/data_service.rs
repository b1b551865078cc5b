use crate::engine::data_block::DataBlock;
use crate::engine::snapshot::Snapshot;
use crate::engine::{BasePage, MAX_DOCUMENT_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE, PageAddress, StreamFactory};
use crate::{Error, Result, bson};

/// Stores documents as chains of data blocks: serialize to bytes, split
/// across pages, link the pieces. The first block's address is the
/// document's stable raw id.
pub(crate) struct DataService<'snapshot, SF: StreamFactory> {
    snapshot: &'snapshot mut Snapshot<SF>,
    max_item_count: u32,
}

impl<'snapshot, SF: StreamFactory> DataService<'snapshot, SF> {
    /// Largest data payload one block can carry.
    pub const MAX_DATA_BYTES_PER_PAGE: usize =
        PAGE_SIZE - PAGE_HEADER_SIZE - BasePage::SLOT_SIZE - DataBlock::DATA_BLOCK_FIXED_SIZE;

    pub fn new(snapshot: &'snapshot mut Snapshot<SF>, max_item_count: u32) -> Self {
        Self {
            snapshot,
            max_item_count,
        }
    }

    pub async fn insert(&mut self, doc: &bson::Document) -> Result<PageAddress> {
        let bytes = doc.to_vec()?;
        if bytes.len() > MAX_DOCUMENT_SIZE {
            return Err(Error::document_size_exceed_limit());
        }

        let mut first_block = PageAddress::EMPTY;
        let mut prev_block: Option<PageAddress> = None;

        for (i, chunk) in bytes.chunks(Self::MAX_DATA_BYTES_PER_PAGE).enumerate() {
            let page_id = self
                .snapshot
                .get_free_data_page(chunk.len() + DataBlock::DATA_BLOCK_FIXED_SIZE)
                .await?;

            let address = self
                .snapshot
                .get_data_page(page_id)
                .await?
                .insert_block(chunk, i > 0);

            self.snapshot.add_or_remove_free_data_list(page_id).await?;

            if let Some(prev) = prev_block {
                self.snapshot
                    .get_data_page(prev.page_id())
                    .await?
                    .set_block_next(prev.index(), address);
            }

            if first_block.is_empty() {
                first_block = address;
            }
            prev_block = Some(address);
        }

        Ok(first_block)
    }

    /// Rewrites a document over its existing chain. Blocks grow only into
    /// their page's free space, so the first block (the document's raw id)
    /// never moves; surplus chain blocks are released, missing ones are
    /// appended.
    pub async fn update(&mut self, address: PageAddress, doc: &bson::Document) -> Result<()> {
        let bytes = doc.to_vec()?;
        if bytes.len() > MAX_DOCUMENT_SIZE {
            return Err(Error::document_size_exceed_limit());
        }

        let mut offset = 0usize;
        let mut current = address;
        let mut prev_block: Option<PageAddress> = None;

        while offset < bytes.len() {
            if !current.is_empty() {
                let (old_length, free_bytes, old_next) = {
                    let page = self.snapshot.get_data_page(current.page_id()).await?;
                    let block = page.get_data_block(current.index());
                    (
                        block.buffer().len(),
                        page.free_bytes(),
                        block.next_block(),
                    )
                };

                let take = (bytes.len() - offset)
                    .min(old_length + free_bytes)
                    .min(Self::MAX_DATA_BYTES_PER_PAGE);

                self.snapshot
                    .get_data_page(current.page_id())
                    .await?
                    .update_block(current.index(), &bytes[offset..offset + take], old_next);

                self.snapshot
                    .add_or_remove_free_data_list(current.page_id())
                    .await?;

                offset += take;
                prev_block = Some(current);
                current = old_next;
            } else {
                let take = (bytes.len() - offset).min(Self::MAX_DATA_BYTES_PER_PAGE);

                let page_id = self
                    .snapshot
                    .get_free_data_page(take + DataBlock::DATA_BLOCK_FIXED_SIZE)
                    .await?;
                let new_address = self
                    .snapshot
                    .get_data_page(page_id)
                    .await?
                    .insert_block(&bytes[offset..offset + take], true);

                self.snapshot.add_or_remove_free_data_list(page_id).await?;

                let prev = prev_block.expect("first chain block always exists");
                self.snapshot
                    .get_data_page(prev.page_id())
                    .await?
                    .set_block_next(prev.index(), new_address);

                offset += take;
                prev_block = Some(new_address);
            }
        }

        // the new content was shorter than the chain; cut the leftovers
        if !current.is_empty() {
            let prev = prev_block.expect("document has at least one block");
            self.snapshot
                .get_data_page(prev.page_id())
                .await?
                .set_block_next(prev.index(), PageAddress::EMPTY);

            self.delete(current).await?;
        }

        Ok(())
    }

    /// Reassembles the serialized document bytes of a chain.
    pub async fn read(&mut self, address: PageAddress) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut current = address;
        let mut counter = 0u32;

        while !current.is_empty() {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(format!(
                    "loop detected reading data chain at {current:?}"
                )));
            }
            counter += 1;

            let page = self.snapshot.get_data_page(current.page_id()).await?;
            let block = page.get_data_block(current.index());
            bytes.extend_from_slice(block.buffer().as_bytes());
            current = block.next_block();
        }

        Ok(bytes)
    }

    pub async fn read_document(&mut self, address: PageAddress) -> Result<bson::Document> {
        let bytes = self.read(address).await?;
        bson::Document::from_bytes(&bytes)
    }

    /// Releases a whole chain, page free lists included.
    pub async fn delete(&mut self, address: PageAddress) -> Result<()> {
        let mut current = address;
        let mut counter = 0u32;

        while !current.is_empty() {
            if counter > self.max_item_count {
                return Err(Error::invalid_datafile_state(format!(
                    "loop detected deleting data chain at {current:?}"
                )));
            }
            counter += 1;

            let next = {
                let page = self.snapshot.get_data_page(current.page_id()).await?;
                let next = page.get_data_block(current.index()).next_block();
                page.delete_block(current.index());
                next
            };

            self.snapshot
                .add_or_remove_free_data_list(current.page_id())
                .await?;

            current = next;
        }

        Ok(())
    }
}
