use crate::engine::disk::DiskService;
use crate::engine::lock_service::{LockService, TransactionScope};
use crate::engine::pages::HeaderPage;
use crate::engine::snapshot::{LockMode, Snapshot};
use crate::engine::transaction_monitor::TransactionMonitorShared;
use crate::engine::transaction_pages::TransactionPages;
use crate::engine::wal_index_service::WalIndexService;
use crate::engine::{BasePage, PageBuffer, PageType, StreamFactory, TypedPage};
use crate::utils::Shared;
use crate::{Error, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// One open transaction: a read version, per-collection snapshots, and a
/// page budget enforced through safepoints.
pub(crate) struct TransactionService<SF: StreamFactory> {
    header: Shared<HeaderPage>,
    locker: Rc<LockService>,
    disk: Rc<DiskService<SF>>,
    wal_index: Rc<WalIndexService>,
    monitor_shared: Shared<TransactionMonitorShared>,

    snapshots: HashMap<String, Snapshot<SF>>,
    trans_pages: Shared<TransactionPages>,

    transaction_id: u32,
    query_only: bool,
    mode: LockMode,
    state: TransactionState,
    max_transaction_size: u32,
    budget_released: bool,

    _scope: TransactionScope,
}

impl<SF: StreamFactory> Drop for TransactionService<SF> {
    fn drop(&mut self) {
        self.release_budget();
    }
}

impl<SF: StreamFactory> TransactionService<SF> {
    pub async fn new(
        header: Shared<HeaderPage>,
        locker: Rc<LockService>,
        disk: Rc<DiskService<SF>>,
        wal_index: Rc<WalIndexService>,
        monitor_shared: Shared<TransactionMonitorShared>,
        max_transaction_size: u32,
        query_only: bool,
    ) -> Result<Self> {
        let scope = locker.enter_transaction().await?;
        let transaction_id = wal_index.next_transaction_id();

        log::debug!("begin transaction {transaction_id} (query_only: {query_only})");

        Ok(Self {
            header,
            locker,
            disk,
            wal_index,
            monitor_shared,
            snapshots: HashMap::new(),
            trans_pages: Shared::new(TransactionPages::new()),
            transaction_id,
            query_only,
            mode: LockMode::Read,
            state: TransactionState::Active,
            max_transaction_size,
            budget_released: false,
            _scope: scope,
        })
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn query_only(&self) -> bool {
        self.query_only
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn max_transaction_size(&self) -> u32 {
        self.max_transaction_size
    }

    /// Forces a header write at commit (pragma changes).
    pub fn touch_header(&mut self) {
        self.mode = LockMode::Write;
        self.trans_pages.borrow_mut().on_commit(|_| {});
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::invalid_transaction_state("transaction is closed"));
        }
        Ok(())
    }

    /// Gets (or upgrades) the snapshot over `collection`.
    pub async fn create_snapshot(
        &mut self,
        mode: LockMode,
        collection: &str,
    ) -> Result<&mut Snapshot<SF>> {
        self.check_active()?;

        if mode == LockMode::Write {
            if self.query_only {
                return Err(Error::invalid_transaction_state(
                    "read-only transaction cannot write",
                ));
            }
            self.mode = LockMode::Write;
        }

        match self.snapshots.entry(collection.to_string()) {
            Entry::Occupied(mut o) => {
                if mode == LockMode::Write && o.get().mode() == LockMode::Read {
                    // upgrade: recreate with the collection lock held
                    let new = Snapshot::new(
                        mode,
                        collection,
                        self.header.clone(),
                        self.transaction_id,
                        self.trans_pages.clone(),
                        &self.locker,
                        self.wal_index.clone(),
                        self.disk.clone(),
                    )
                    .await?;
                    o.insert(new);
                }
                Ok(o.into_mut())
            }
            Entry::Vacant(v) => {
                let new = Snapshot::new(
                    mode,
                    collection,
                    self.header.clone(),
                    self.transaction_id,
                    self.trans_pages.clone(),
                    &self.locker,
                    self.wal_index.clone(),
                    self.disk.clone(),
                )
                .await?;
                Ok(v.insert(new))
            }
        }
    }

    pub fn get_snapshot(&mut self, collection: &str) -> Option<&mut Snapshot<SF>> {
        self.snapshots.get_mut(collection)
    }

    fn try_extend_max_transaction_size(&mut self) -> bool {
        let mut shared = self.monitor_shared.borrow_mut();
        if shared.free_pages >= shared.initial_size {
            self.max_transaction_size += shared.initial_size;
            shared.free_pages -= shared.initial_size;
            true
        } else {
            false
        }
    }

    /// Spills dirty pages to the LOG when the page budget is exhausted and
    /// cannot be extended from the shared pool; local page sets restart
    /// empty but stay visible through the transaction's dirty-position
    /// map.
    pub async fn safe_point(&mut self) -> Result<()> {
        self.check_active()?;

        if self.trans_pages.borrow().transaction_size < self.max_transaction_size
            || self.try_extend_max_transaction_size()
        {
            return Ok(());
        }

        log::debug!(
            "safepoint: flushing {} pages of transaction {}",
            self.trans_pages.borrow().transaction_size,
            self.transaction_id
        );

        if self.mode == LockMode::Write {
            self.persist_dirty_pages(false).await?;
        }

        for snapshot in self.snapshots.values_mut() {
            let buffers = snapshot.take_clean_buffers();
            self.disk.discard_clean_pages(buffers);
        }

        self.trans_pages.borrow_mut().transaction_size = 0;
        Ok(())
    }

    /// Writes all dirty pages from write snapshots into the LOG as one
    /// batch. On commit, the last page of the batch carries the
    /// confirmation mark; when the header changed it is serialized as that
    /// last page.
    async fn persist_dirty_pages(&mut self, commit: bool) -> Result<usize> {
        let header_changed = commit && self.trans_pages.borrow().header_changed();
        let mark_last = commit && !header_changed;

        let mut pages: Vec<TypedPage> = Vec::new();
        for snapshot in self
            .snapshots
            .values_mut()
            .filter(|s| s.mode() == LockMode::Write)
        {
            pages.extend(snapshot.take_dirty_pages(true));
        }

        let mut buffers: Vec<Box<PageBuffer>> = Vec::with_capacity(pages.len() + 1);
        let last_index = pages.len().saturating_sub(1);

        for (i, mut page) in pages.into_iter().enumerate() {
            let base = page.as_base_mut();
            base.set_transaction_id(self.transaction_id);
            base.set_confirmed(mark_last && i == last_index);

            // the tail of the deleted chain links into the current free
            // chain; the header then points at the chain head
            if commit && self.trans_pages.borrow().last_deleted_page() == base.page_id() {
                debug_assert!(header_changed, "deleted pages imply a header change");
                debug_assert_eq!(
                    base.page_type(),
                    PageType::Empty,
                    "deleted page must be empty"
                );

                let mut header = self.header.borrow_mut();
                base.set_next_page_id(header.free_empty_page_list());
                header
                    .set_free_empty_page_list(self.trans_pages.borrow().first_deleted_page());
            }

            page.update_buffer();
            buffers.push(page.into_buffer());
        }

        if header_changed {
            let mut header = self.header.borrow_mut();
            header.base_mut().set_transaction_id(self.transaction_id);
            header.base_mut().set_confirmed(true);

            self.trans_pages.borrow_mut().call_on_commit(&mut header);

            let mut copy = self.disk.new_page()?;
            header.copy_buffer_into(&mut copy);

            header.base_mut().set_transaction_id(u32::MAX);
            header.base_mut().set_confirmed(false);

            buffers.push(copy);
        }

        if buffers.is_empty() {
            return Ok(0);
        }

        let positions = self.disk.write_log_disk(buffers).await?;
        let count = positions.len();

        let mut trans_pages = self.trans_pages.borrow_mut();
        for position in positions {
            trans_pages.dirty_pages.insert(position.page_id(), position);
        }

        Ok(count)
    }

    pub async fn commit(mut self) -> Result<()> {
        self.check_active()?;

        log::debug!(
            "commit transaction {} ({} pages)",
            self.transaction_id,
            self.trans_pages.borrow().transaction_size
        );

        if self.mode == LockMode::Write {
            let count = self.persist_dirty_pages(true).await?;
            if count > 0 {
                let positions: Vec<_> =
                    self.trans_pages.borrow().dirty_pages.values().copied().collect();
                self.wal_index
                    .confirm_transaction(self.transaction_id, &positions);
            }
        }

        self.release_pages();
        self.state = TransactionState::Committed;

        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.check_active()?;

        log::debug!(
            "rollback transaction {} ({} new pages to return)",
            self.transaction_id,
            self.trans_pages.borrow().new_pages().len()
        );

        // pages taken from the end of the file (or the free chain) must go
        // back to the free chain; that is a tiny system transaction of its
        // own
        if !self.trans_pages.borrow().new_pages().is_empty() {
            self.return_new_pages().await?;
        }

        for snapshot in self.snapshots.values_mut() {
            let dirty = snapshot.take_dirty_buffers();
            self.disk.discard_dirty_pages(dirty);
            let clean = snapshot.take_clean_buffers();
            self.disk.discard_clean_pages(clean);
        }
        self.snapshots.clear();

        self.state = TransactionState::Aborted;

        Ok(())
    }

    /// Writes the transaction's freshly allocated pages back onto the
    /// header free-empty chain, as an independent confirmed LOG batch.
    async fn return_new_pages(&mut self) -> Result<()> {
        let transaction_id = self.wal_index.next_transaction_id();

        let save_point = self.header.borrow_mut().save_point();
        let result = self.return_new_pages_inner(transaction_id).await;
        if result.is_err() {
            self.header.borrow_mut().restore(&save_point);
        }
        result
    }

    async fn return_new_pages_inner(&mut self, transaction_id: u32) -> Result<()> {
        let mut buffers: Vec<Box<PageBuffer>> = Vec::new();
        let mut positions = Vec::new();

        {
            let trans_pages = self.trans_pages.borrow();
            let new_pages = trans_pages.new_pages();
            let mut header = self.header.borrow_mut();

            for (i, &page_id) in new_pages.iter().enumerate() {
                let next = new_pages
                    .get(i + 1)
                    .copied()
                    .unwrap_or(header.free_empty_page_list());

                let buffer = self.disk.new_page()?;
                let mut page = BasePage::new(buffer, page_id, PageType::Empty);
                page.set_next_page_id(next);
                page.set_transaction_id(transaction_id);
                page.update_buffer();
                buffers.push(page.into_buffer());
            }

            header.set_free_empty_page_list(new_pages[0]);
            header.base_mut().set_transaction_id(transaction_id);
            header.base_mut().set_confirmed(true);

            let mut copy = self.disk.new_page()?;
            header.copy_buffer_into(&mut copy);
            header.base_mut().set_transaction_id(u32::MAX);
            header.base_mut().set_confirmed(false);
            buffers.push(copy);
        }

        for position in self.disk.write_log_disk(buffers).await? {
            positions.push(position);
        }

        self.wal_index.confirm_transaction(transaction_id, &positions);
        Ok(())
    }

    fn release_pages(&mut self) {
        for snapshot in self.snapshots.values_mut() {
            let buffers = snapshot.take_clean_buffers();
            self.disk.discard_clean_pages(buffers);
        }
        self.snapshots.clear();
    }

    fn release_budget(&mut self) {
        if self.budget_released {
            return;
        }
        self.budget_released = true;

        let mut shared = self.monitor_shared.borrow_mut();
        shared.free_pages += self.max_transaction_size;
        shared.open_transactions -= 1;
    }
}
