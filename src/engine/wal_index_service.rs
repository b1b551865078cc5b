use crate::Result;
use crate::engine::disk::DiskService;
use crate::engine::page_position::PagePosition;
use crate::engine::pages::{BasePage, HeaderPage, PageType};
use crate::engine::{FileOrigin, PAGE_SIZE, StreamFactory};
use futures::TryStreamExt;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::pin::pin;

/// The WAL index: which LOG copy of each page is visible at a given read
/// version.
///
/// Every commit bumps `current_read_version` and records `(version, log
/// position)` for each page it wrote; only transactions present in the
/// confirmed set are visible to readers or eligible for checkpoint.
pub(crate) struct WalIndexService {
    last_transaction_id: Cell<u32>,
    current_read_version: Cell<i32>,
    index: RefCell<HashMap<u32, Vec<(i32, u64)>>>,
    confirmed_transactions: RefCell<HashSet<u32>>,
}

impl WalIndexService {
    pub fn new() -> Self {
        Self {
            last_transaction_id: Cell::new(0),
            current_read_version: Cell::new(0),
            index: RefCell::new(HashMap::new()),
            confirmed_transactions: RefCell::new(HashSet::new()),
        }
    }

    pub fn current_read_version(&self) -> i32 {
        self.current_read_version.get()
    }

    pub fn next_transaction_id(&self) -> u32 {
        let id = self.last_transaction_id.get() + 1;
        self.last_transaction_id.set(id);
        id
    }

    pub fn is_confirmed(&self, transaction_id: u32) -> bool {
        self.confirmed_transactions
            .borrow()
            .contains(&transaction_id)
    }

    /// LOG position of the newest version of `page_id` visible at
    /// `version`, or `None` when the DATA copy is authoritative.
    pub fn get_page_position(&self, page_id: u32, version: i32) -> Option<(i32, u64)> {
        if version == 0 {
            return None;
        }

        let index = self.index.borrow();
        let versions = index.get(&page_id)?;
        versions
            .iter()
            .rev()
            .find(|(wal_version, _)| *wal_version <= version)
            .copied()
    }

    /// Marks a transaction durable: bump the read version and publish its
    /// page positions under that version.
    pub fn confirm_transaction(&self, transaction_id: u32, positions: &[PagePosition]) {
        let version = self.current_read_version.get() + 1;
        self.current_read_version.set(version);

        let mut index = self.index.borrow_mut();
        for position in positions {
            index
                .entry(position.page_id())
                .or_default()
                .push((version, position.position()));
        }

        self.confirmed_transactions
            .borrow_mut()
            .insert(transaction_id);

        log::debug!(
            "confirmed transaction {transaction_id} at read version {version} ({} pages)",
            positions.len()
        );
    }

    /// Rebuilds the index from the LOG on open. Batches whose final page
    /// carries the confirmation mark become visible; a trailing
    /// unconfirmed batch is discarded by truncating the LOG.
    pub async fn restore_index(
        &self,
        header: &mut HeaderPage,
        disk: &DiskService<impl StreamFactory>,
    ) -> Result<()> {
        let mut positions = HashMap::<u32, Vec<PagePosition>>::new();
        let mut current = 0u64;
        let mut confirmed_end = 0u64;
        let mut last_transaction_id = 0u32;

        {
            let mut read_stream = pin!(disk.read_full(FileOrigin::Log));
            while let Some(buffer) = read_stream.try_next().await? {
                if buffer.is_blank() {
                    current += PAGE_SIZE as u64;
                    continue;
                }

                let page_id = buffer.read_u32(BasePage::P_PAGE_ID);
                let is_confirmed = buffer.read_bool(BasePage::P_IS_CONFIRMED);
                let transaction_id = buffer.read_u32(BasePage::P_TRANSACTION_ID);

                let batch = positions.entry(transaction_id).or_default();
                batch.push(PagePosition::new(page_id, current));

                if is_confirmed {
                    self.confirm_transaction(transaction_id, batch);
                    confirmed_end = current + PAGE_SIZE as u64;

                    // a header modified in a transaction is always the
                    // batch's final page
                    if buffer.read_u8(BasePage::P_PAGE_TYPE) == PageType::Header as u8 {
                        *header.base_mut().buffer_mut().buffer_mut() = *buffer.buffer();
                        header.reload_fully()?;
                        header.base_mut().set_transaction_id(u32::MAX);
                        header.base_mut().set_confirmed(false);
                    }
                }

                last_transaction_id = last_transaction_id.max(transaction_id);
                current += PAGE_SIZE as u64;
            }
        }

        self.last_transaction_id.set(last_transaction_id);

        let log_length = disk.get_file_length(FileOrigin::Log);
        if confirmed_end < log_length {
            log::warn!(
                "discarding unconfirmed log tail ({} bytes)",
                log_length - confirmed_end
            );
            disk.set_length(confirmed_end, FileOrigin::Log).await?;
        }

        Ok(())
    }

    /// Copies the newest confirmed version of every logged page back into
    /// the DATA file, then truncates the LOG and resets the index. The
    /// caller holds the exclusive database lock.
    pub async fn checkpoint(&self, disk: &DiskService<impl StreamFactory>) -> Result<usize> {
        disk.flush_log_queue().await?;

        if disk.get_file_length(FileOrigin::Log) == 0
            || self.confirmed_transactions.borrow().is_empty()
        {
            return Ok(0);
        }

        log::info!("checkpointing write-ahead log");

        // newest confirmed copy per page id wins
        let mut latest = HashMap::<u32, Box<crate::engine::PageBuffer>>::new();

        {
            let mut reader = pin!(disk.read_full(FileOrigin::Log));
            while let Some(buffer) = reader.try_next().await? {
                if buffer.is_blank() {
                    continue;
                }

                let transaction_id = buffer.read_u32(BasePage::P_TRANSACTION_ID);
                if !self.is_confirmed(transaction_id) {
                    continue;
                }

                let page_id = buffer.read_u32(BasePage::P_PAGE_ID);
                let mut buffer = buffer;
                buffer.write_u32(BasePage::P_TRANSACTION_ID, u32::MAX);
                buffer.write_bool(BasePage::P_IS_CONFIRMED, false);
                buffer.set_position_origin(BasePage::get_page_position(page_id), FileOrigin::Data);

                latest.insert(page_id, buffer);
            }
        }

        let count = latest.len();
        disk.write_data_disk(latest.into_values().collect()).await?;

        self.clear(disk).await?;

        Ok(count)
    }

    /// Resets the index and empties the LOG.
    pub async fn clear(&self, disk: &DiskService<impl StreamFactory>) -> Result<()> {
        self.confirmed_transactions.borrow_mut().clear();
        self.index.borrow_mut().clear();
        self.current_read_version.set(0);
        self.last_transaction_id.set(0);

        disk.cache().clear();
        disk.set_length(0, FileOrigin::Log).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_filtered_by_read_version() {
        let wal = WalIndexService::new();

        let tx1 = wal.next_transaction_id();
        wal.confirm_transaction(tx1, &[PagePosition::new(4, 0)]);
        let tx2 = wal.next_transaction_id();
        wal.confirm_transaction(tx2, &[PagePosition::new(4, 8192)]);

        // version 1 sees the first copy, version 2 the second
        assert_eq!(wal.get_page_position(4, 1), Some((1, 0)));
        assert_eq!(wal.get_page_position(4, 2), Some((2, 8192)));
        // version 0 predates both; the data file is authoritative
        assert_eq!(wal.get_page_position(4, 0), None);
        // unknown pages fall through to the data file
        assert_eq!(wal.get_page_position(9, 2), None);
    }

    #[test]
    fn transaction_ids_are_monotonic() {
        let wal = WalIndexService::new();
        let a = wal.next_transaction_id();
        let b = wal.next_transaction_id();
        assert!(b > a);
        assert!(!wal.is_confirmed(a));
    }
}
