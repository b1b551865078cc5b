use crate::engine::disk::DiskService;
use crate::engine::lock_service::{CollectionLockScope, LockService};
use crate::engine::pages::HeaderPage;
use crate::engine::transaction_pages::TransactionPages;
use crate::engine::wal_index_service::WalIndexService;
use crate::engine::{
    BasePage, CollectionPage, DataPage, FileOrigin, IndexPage, PageBuffer, PageType, StreamFactory,
    TypedPage, VectorIndexPage,
};
use crate::utils::Shared;
use crate::{Error, Result};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum LockMode {
    Read,
    Write,
}

/// One transaction's view over one collection.
///
/// Owns a local map of typed page copies. Reads resolve in order: local
/// copy → the transaction's own spilled LOG pages → the WAL index at the
/// snapshot's read version → the DATA file. Write snapshots hold the
/// collection lock for their whole lifetime.
pub(crate) struct Snapshot<SF: StreamFactory> {
    _lock_scope: Option<CollectionLockScope>,

    transaction_id: u32,
    mode: LockMode,
    collection_name: String,
    collection_page_id: u32,
    collection_page: Option<CollectionPage>,

    header: Shared<HeaderPage>,
    disk: Rc<DiskService<SF>>,
    wal_index: Rc<WalIndexService>,
    trans_pages: Shared<TransactionPages>,
    read_version: i32,
    local_pages: HashMap<u32, TypedPage>,
}

impl<SF: StreamFactory> Snapshot<SF> {
    pub async fn new(
        mode: LockMode,
        collection_name: &str,
        header: Shared<HeaderPage>,
        transaction_id: u32,
        trans_pages: Shared<TransactionPages>,
        locker: &LockService,
        wal_index: Rc<WalIndexService>,
        disk: Rc<DiskService<SF>>,
    ) -> Result<Self> {
        let lock_scope = if mode == LockMode::Write {
            Some(locker.enter_lock(collection_name).await?)
        } else {
            None
        };

        let read_version = wal_index.current_read_version();
        let collection_page_id = header.borrow().get_collection_page_id(collection_name);

        let mut snapshot = Self {
            _lock_scope: lock_scope,
            transaction_id,
            mode,
            collection_name: collection_name.to_string(),
            collection_page_id,
            collection_page: None,
            header,
            disk,
            wal_index,
            trans_pages,
            read_version,
            local_pages: HashMap::new(),
        };

        snapshot.ensure_collection_page().await?;

        Ok(snapshot)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn read_version(&self) -> i32 {
        self.read_version
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn header(&self) -> &Shared<HeaderPage> {
        &self.header
    }

    pub fn trans_pages(&self) -> &Shared<TransactionPages> {
        &self.trans_pages
    }

    pub fn disk(&self) -> &Rc<DiskService<SF>> {
        &self.disk
    }

    pub fn collection_page(&self) -> Option<&CollectionPage> {
        self.collection_page.as_ref()
    }

    pub fn collection_page_mut(&mut self) -> Option<&mut CollectionPage> {
        self.collection_page.as_mut()
    }

    /// (Re-)fetches the collection page after creation or a safepoint
    /// spill.
    pub async fn ensure_collection_page(&mut self) -> Result<()> {
        if self.collection_page.is_some() || self.collection_page_id == u32::MAX {
            return Ok(());
        }

        let buffer = self.read_page_buffer(self.collection_page_id, false).await?;
        self.collection_page = Some(CollectionPage::load(buffer)?);
        self.add_transaction_size();
        Ok(())
    }

    /// Installs a freshly created collection page (collection creation).
    pub fn set_collection_page(&mut self, page: CollectionPage) {
        debug_assert!(self.collection_page.is_none());
        self.collection_page_id = page.page_id();
        self.collection_page = Some(page);
    }

    fn add_transaction_size(&self) {
        self.trans_pages.borrow_mut().transaction_size += 1;
    }
}

// page read path
impl<SF: StreamFactory> Snapshot<SF> {
    /// Raw buffer for `page_id` following the snapshot lookup order.
    async fn read_page_buffer(
        &self,
        page_id: u32,
        use_latest_version: bool,
    ) -> Result<Box<PageBuffer>> {
        assert!(
            page_id != u32::MAX && page_id <= self.header.borrow().last_page_id(),
            "page {page_id} out of range"
        );

        // the transaction's own spilled copy wins over every version
        let own_position = self.trans_pages.borrow().dirty_pages.get(&page_id).copied();
        if let Some(position) = own_position {
            return self
                .disk
                .read_writable_page(position.position(), FileOrigin::Log)
                .await;
        }

        let version = if use_latest_version {
            i32::MAX
        } else {
            self.read_version
        };
        if let Some((_, position)) = self.wal_index.get_page_position(page_id, version) {
            let mut buffer = self.disk.read_writable_page(position, FileOrigin::Log).await?;
            // visible log copies keep their commit stamps on disk only
            buffer.write_u32(BasePage::P_TRANSACTION_ID, u32::MAX);
            buffer.write_bool(BasePage::P_IS_CONFIRMED, false);
            return Ok(buffer);
        }

        self.disk
            .read_writable_page(BasePage::get_page_position(page_id), FileOrigin::Data)
            .await
    }

    async fn load_local_page(&mut self, page_id: u32, use_latest_version: bool) -> Result<()> {
        let buffer = self.read_page_buffer(page_id, use_latest_version).await?;
        let page = TypedPage::load(buffer)?;
        self.local_pages.insert(page_id, page);
        self.add_transaction_size();
        Ok(())
    }

    pub async fn get_page(&mut self, page_id: u32) -> Result<&mut TypedPage> {
        self.get_page_with(page_id, false).await
    }

    async fn get_page_with(
        &mut self,
        page_id: u32,
        use_latest_version: bool,
    ) -> Result<&mut TypedPage> {
        if !self.local_pages.contains_key(&page_id) {
            self.load_local_page(page_id, use_latest_version).await?;
        }
        Ok(self.local_pages.get_mut(&page_id).unwrap())
    }

    pub async fn get_data_page(&mut self, page_id: u32) -> Result<&mut DataPage> {
        match self.get_page(page_id).await? {
            TypedPage::Data(page) => Ok(page),
            page => Err(Error::invalid_page_type(
                PageType::Data,
                page.as_base().page_type(),
                page_id,
            )),
        }
    }

    pub async fn get_index_page(&mut self, page_id: u32) -> Result<&mut IndexPage> {
        match self.get_page(page_id).await? {
            TypedPage::Index(page) => Ok(page),
            page => Err(Error::invalid_page_type(
                PageType::Index,
                page.as_base().page_type(),
                page_id,
            )),
        }
    }

    pub async fn get_vector_page(&mut self, page_id: u32) -> Result<&mut VectorIndexPage> {
        match self.get_page(page_id).await? {
            TypedPage::Vector(page) => Ok(page),
            page => Err(Error::invalid_page_type(
                PageType::VectorIndex,
                page.as_base().page_type(),
                page_id,
            )),
        }
    }
}

// page allocation and release
impl<SF: StreamFactory> Snapshot<SF> {
    /// Allocates a page of `page_type`: pops the header free-empty chain
    /// or extends the file. Returns the new page id.
    pub async fn new_page(&mut self, page_type: PageType) -> Result<u32> {
        debug_assert!(self.mode == LockMode::Write, "write snapshots only");

        let page_id;
        let buffer;

        let free_empty_page_list = self.header.borrow().free_empty_page_list();
        if free_empty_page_list != u32::MAX {
            // the chain head must be seen at its latest version: it was
            // relinked by the most recent commit, whatever our read version
            let free = self.get_page_with(free_empty_page_list, true).await?;
            let base = free.as_base();
            if base.page_type() != PageType::Empty {
                return Err(Error::invalid_datafile_state(format!(
                    "page {} on the free chain has type {:?}",
                    base.page_id(),
                    base.page_type()
                )));
            }

            page_id = base.page_id();
            let next = base.next_page_id();
            let free = self.local_pages.remove(&page_id).unwrap();

            self.header.borrow_mut().set_free_empty_page_list(next);

            buffer = free.into_buffer();
        } else {
            let mut header = self.header.borrow_mut();
            let new_length = (header.last_page_id() as u64 + 2) * crate::engine::PAGE_SIZE as u64;
            if new_length > header.pragmas().limit_size as u64 {
                return Err(Error::size_limit_reached());
            }

            page_id = header.last_page_id() + 1;
            header.set_last_page_id(page_id);
            drop(header);

            buffer = self.disk.new_page()?;
        }

        self.trans_pages.borrow_mut().add_new_page(page_id);

        // reset identity; the buffer may carry an old page image
        let mut buffer = buffer;
        buffer.reset();
        buffer.buffer_mut().fill(0);

        let col_id = if page_type == PageType::Collection {
            page_id
        } else {
            self.collection_page_id
        };

        let mut page = TypedPage::new(buffer, page_id, page_type);
        page.as_base_mut().set_col_id(col_id);
        page.as_base_mut().set_dirty();

        self.add_transaction_size();

        if page_type == PageType::Collection {
            let TypedPage::Collection(page) = page else {
                unreachable!()
            };
            self.set_collection_page(page);
        } else {
            self.local_pages.insert(page_id, page);
        }

        Ok(page_id)
    }

    /// Empties a page and chains it into the transaction's deleted list
    /// (returned to the header free chain at commit).
    pub async fn delete_page(&mut self, page_id: u32) -> Result<()> {
        let first_deleted = self.trans_pages.borrow().first_deleted_page();

        {
            let page = self.get_page(page_id).await?.as_base_mut();
            debug_assert!(
                page.items_count() == 0 && page.used_bytes() == 0,
                "only empty pages can be deleted"
            );

            page.mark_as_empty();

            if first_deleted != u32::MAX {
                // stack: newest deleted page points at the previous head
                page.set_next_page_id(first_deleted);
            }
        }

        let mut trans_pages = self.trans_pages.borrow_mut();
        if first_deleted == u32::MAX {
            trans_pages.set_first_deleted_page(page_id);
            trans_pages.set_last_deleted_page(page_id);
        } else {
            trans_pages.set_first_deleted_page(page_id);
        }
        trans_pages.inc_deleted_pages();

        Ok(())
    }
}

// drop-collection support
impl<SF: StreamFactory> Snapshot<SF> {
    /// Empties a page regardless of content and chains it into the
    /// deleted list (drop-collection wipes whole pages).
    pub async fn delete_full_page(&mut self, page_id: u32) -> Result<()> {
        let first_deleted = self.trans_pages.borrow().first_deleted_page();

        {
            let page = self.get_page(page_id).await?.as_base_mut();
            page.mark_as_empty();
            if first_deleted != u32::MAX {
                page.set_next_page_id(first_deleted);
            }
        }

        let mut trans_pages = self.trans_pages.borrow_mut();
        if first_deleted == u32::MAX {
            trans_pages.set_first_deleted_page(page_id);
            trans_pages.set_last_deleted_page(page_id);
        } else {
            trans_pages.set_first_deleted_page(page_id);
        }
        trans_pages.inc_deleted_pages();

        Ok(())
    }

    /// Empties the collection page itself and chains it into the deleted
    /// list; the snapshot keeps owning it so commit still writes it.
    pub fn delete_collection_page(&mut self) {
        let first_deleted = self.trans_pages.borrow().first_deleted_page();
        let collection_page = self.collection_page.as_mut().unwrap();
        let page_id = collection_page.page_id();

        collection_page.as_base_mut().mark_as_empty();
        if first_deleted != u32::MAX {
            collection_page
                .as_base_mut()
                .set_next_page_id(first_deleted);
        }

        let mut trans_pages = self.trans_pages.borrow_mut();
        if first_deleted == u32::MAX {
            trans_pages.set_first_deleted_page(page_id);
            trans_pages.set_last_deleted_page(page_id);
        } else {
            trans_pages.set_first_deleted_page(page_id);
        }
        trans_pages.inc_deleted_pages();
    }
}

// free list maintenance
impl<SF: StreamFactory> Snapshot<SF> {
    /// Unlinks `page_id` from the free list starting at `start_page_id`;
    /// returns the (possibly unchanged) list head.
    async fn remove_free_list(&mut self, page_id: u32, start_page_id: u32) -> Result<u32> {
        let (prev, next) = {
            let base = self.get_page(page_id).await?.as_base();
            (base.prev_page_id(), base.next_page_id())
        };

        if prev != u32::MAX {
            let prev_page = self.get_page(prev).await?.as_base_mut();
            prev_page.set_next_page_id(next);
            prev_page.set_dirty();
        }

        if next != u32::MAX {
            let next_page = self.get_page(next).await?.as_base_mut();
            next_page.set_prev_page_id(prev);
            next_page.set_dirty();
        }

        let base = self.get_page(page_id).await?.as_base_mut();
        base.set_prev_page_id(u32::MAX);
        base.set_next_page_id(u32::MAX);
        base.set_dirty();

        Ok(if start_page_id == page_id {
            next
        } else {
            start_page_id
        })
    }

    /// Links `page_id` at the head of the free list; returns the new head.
    async fn add_free_list(&mut self, page_id: u32, start_page_id: u32) -> Result<u32> {
        {
            let base = self.get_page(page_id).await?.as_base();
            assert!(
                base.prev_page_id() == u32::MAX && base.next_page_id() == u32::MAX,
                "only unlinked pages can enter a free list"
            );
        }

        if start_page_id != u32::MAX {
            let next = self.get_page(start_page_id).await?.as_base_mut();
            next.set_prev_page_id(page_id);
            next.set_dirty();
        }

        let base = self.get_page(page_id).await?.as_base_mut();
        base.set_next_page_id(start_page_id);
        base.set_dirty();

        Ok(page_id)
    }

    /// Rebuckets a data page after its free space changed; deletes it when
    /// it holds no more items.
    pub async fn add_or_remove_free_data_list(&mut self, page_id: u32) -> Result<()> {
        let (free_bytes, items_count, initial_slot) = {
            let page = self.get_data_page(page_id).await?;
            (page.free_bytes(), page.items_count(), page.page_list_slot())
        };
        let new_slot = DataPage::free_index_slot(free_bytes);

        if new_slot == initial_slot && items_count > 0 {
            return Ok(());
        }

        if initial_slot != u8::MAX {
            let start = self.collection_page.as_ref().unwrap().free_data_page_list
                [initial_slot as usize];
            let new_start = self.remove_free_list(page_id, start).await?;
            let collection_page = self.collection_page.as_mut().unwrap();
            collection_page.free_data_page_list[initial_slot as usize] = new_start;
            collection_page.set_dirty();
        }

        if items_count == 0 {
            self.delete_page(page_id).await?;
        } else {
            let start =
                self.collection_page.as_ref().unwrap().free_data_page_list[new_slot as usize];
            let new_start = self.add_free_list(page_id, start).await?;
            let collection_page = self.collection_page.as_mut().unwrap();
            collection_page.free_data_page_list[new_slot as usize] = new_start;
            collection_page.set_dirty();

            let page = self.get_data_page(page_id).await?;
            page.set_page_list_slot(new_slot);
            page.set_dirty();
        }

        Ok(())
    }

    /// Rebuckets an index or vector page inside its index's free list
    /// (two buckets: usable and full). `index_name` owns the list head.
    pub async fn add_or_remove_free_index_list(
        &mut self,
        page_id: u32,
        index_name: &str,
        max_node_length: usize,
    ) -> Result<()> {
        let (free_bytes, items_count, initial_slot) = {
            let base = self.get_page(page_id).await?.as_base();
            (base.free_bytes(), base.items_count(), base.page_list_slot())
        };

        let new_slot = if free_bytes >= max_node_length + BasePage::SLOT_SIZE {
            0
        } else {
            1
        };
        let is_on_list = initial_slot == 0;
        let must_keep = new_slot == 0;

        let start = self
            .collection_page
            .as_ref()
            .unwrap()
            .get_collection_index(index_name)
            .ok_or_else(|| Error::index_not_found(&self.collection_name, index_name))?
            .free_index_page_list();

        if items_count == 0 {
            if is_on_list {
                let new_start = self.remove_free_list(page_id, start).await?;
                self.set_index_free_list(index_name, new_start);
            }
            self.delete_page(page_id).await?;
        } else {
            if is_on_list && !must_keep {
                let new_start = self.remove_free_list(page_id, start).await?;
                self.set_index_free_list(index_name, new_start);
            } else if !is_on_list && must_keep {
                let new_start = self.add_free_list(page_id, start).await?;
                self.set_index_free_list(index_name, new_start);
            }

            let base = self.get_page(page_id).await?.as_base_mut();
            base.set_page_list_slot(new_slot);
            base.set_dirty();
        }

        Ok(())
    }

    fn set_index_free_list(&mut self, index_name: &str, start: u32) {
        let collection_page = self.collection_page.as_mut().unwrap();
        collection_page
            .get_collection_index_mut(index_name)
            .unwrap()
            .set_free_index_page_list(start);
        collection_page.set_dirty();
    }

    /// A data page with at least `length` bytes available, preferring the
    /// fullest viable bucket.
    pub async fn get_free_data_page(&mut self, length: usize) -> Result<u32> {
        let length = length + BasePage::SLOT_SIZE;
        let start_slot = DataPage::get_minimum_index_slot(length);

        for current_slot in (0..=start_slot).rev() {
            let free_page_id = self.collection_page.as_ref().unwrap().free_data_page_list
                [current_slot as usize];
            if free_page_id == u32::MAX {
                continue;
            }

            let page = self.get_data_page(free_page_id).await?;
            debug_assert_eq!(
                page.page_list_slot() as i32,
                current_slot,
                "stored slot must match its bucket"
            );
            debug_assert!(page.free_bytes() >= length, "bucketed page must fit");

            page.set_dirty();
            return Ok(free_page_id);
        }

        self.new_page(PageType::Data).await
    }

    /// An index/vector page with room for one more node, from the index's
    /// free list or freshly allocated.
    pub async fn get_free_index_page(
        &mut self,
        page_type: PageType,
        free_index_page_list: u32,
    ) -> Result<u32> {
        if free_index_page_list == u32::MAX {
            self.new_page(page_type).await
        } else {
            Ok(free_index_page_list)
        }
    }
}

// commit/rollback support
impl<SF: StreamFactory> Snapshot<SF> {
    /// Removes and returns dirty local pages (and the collection page when
    /// it is dirty and `with_collection_page`).
    pub fn take_dirty_pages(&mut self, with_collection_page: bool) -> Vec<TypedPage> {
        let ids: Vec<u32> = self
            .local_pages
            .iter()
            .filter(|(_, page)| page.as_base().is_dirty())
            .map(|(&id, _)| id)
            .collect();

        let mut pages: Vec<TypedPage> = ids
            .into_iter()
            .map(|id| self.local_pages.remove(&id).unwrap())
            .collect();

        if with_collection_page
            && self
                .collection_page
                .as_ref()
                .is_some_and(|page| page.is_dirty())
        {
            pages.push(TypedPage::Collection(self.collection_page.take().unwrap()));
        }

        pages
    }

    /// Removes every remaining local page (the clean ones after
    /// `take_dirty_pages`), returning their buffers.
    pub fn take_clean_buffers(&mut self) -> Vec<Box<PageBuffer>> {
        let mut buffers: Vec<Box<PageBuffer>> = self
            .local_pages
            .drain()
            .map(|(_, page)| page.into_buffer())
            .collect();

        if let Some(page) = self.collection_page.take() {
            buffers.push(page.into_base().into_buffer());
        }

        buffers
    }

    /// Dirty buffers without going through the LOG (rollback).
    pub fn take_dirty_buffers(&mut self) -> Vec<Box<PageBuffer>> {
        self.take_dirty_pages(true)
            .into_iter()
            .map(TypedPage::into_buffer)
            .collect()
    }
}

impl TypedPage {
    pub(crate) fn load(buffer: Box<PageBuffer>) -> Result<Self> {
        let page_type: PageType = buffer.read_u8(BasePage::P_PAGE_TYPE).try_into()?;
        Ok(match page_type {
            PageType::Empty => TypedPage::Base(BasePage::load(buffer)?),
            PageType::Data => TypedPage::Data(DataPage::load(buffer)?),
            PageType::Index => TypedPage::Index(IndexPage::load(buffer)?),
            PageType::VectorIndex => TypedPage::Vector(VectorIndexPage::load(buffer)?),
            PageType::Collection => TypedPage::Collection(CollectionPage::load(buffer)?),
            PageType::Header => return Err(Error::invalid_page()),
        })
    }

    pub(crate) fn new(buffer: Box<PageBuffer>, page_id: u32, page_type: PageType) -> Self {
        match page_type {
            PageType::Data => TypedPage::Data(DataPage::new(buffer, page_id)),
            PageType::Index => TypedPage::Index(IndexPage::new(buffer, page_id)),
            PageType::VectorIndex => TypedPage::Vector(VectorIndexPage::new(buffer, page_id)),
            PageType::Collection => TypedPage::Collection(CollectionPage::new(buffer, page_id)),
            PageType::Empty | PageType::Header => {
                TypedPage::Base(BasePage::new(buffer, page_id, page_type))
            }
        }
    }
}
