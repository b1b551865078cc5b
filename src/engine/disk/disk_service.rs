use crate::engine::disk::MemoryCache;
use crate::engine::*;
use crate::utils::Collation;
use crate::{Error, Result};
use async_lock::Mutex as AsyncMutex;
use futures::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Stream};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::rc::Rc;

/// Owns the DATA and LOG streams and the page cache.
///
/// LOG writes go through a queue: `enqueue_log_pages` assigns each page
/// its final LOG position immediately (so callers can record positions)
/// and `flush_log_queue` drains the queue in submission order, flushes the
/// stream once at the batch end, and publishes the written buffers into
/// the cache as readable pages.
pub(crate) struct DiskService<SF: StreamFactory> {
    cache: MemoryCache,
    data_factory: SF,
    log_factory: SF,

    data_stream: AsyncMutex<Box<dyn FileStream>>,
    log_stream: AsyncMutex<Box<dyn FileStream>>,

    data_length: Cell<u64>,
    /// next LOG append position (includes enqueued, unflushed pages)
    log_length: Cell<u64>,
    queue: RefCell<VecDeque<Box<PageBuffer>>>,
}

impl<SF: StreamFactory> DiskService<SF> {
    /// Opens (or bootstraps) the database streams. Returns the service and
    /// whether the data file was created by this call; on failure, hands
    /// the factories back to the caller.
    pub async fn new(
        data_factory: SF,
        log_factory: SF,
        collation: Option<Collation>,
        initial_size: u64,
    ) -> std::result::Result<(Self, bool), (Error, SF, SF)> {
        let cache = MemoryCache::new();
        match Self::open_streams(&data_factory, &log_factory, collation, initial_size, &cache)
            .await
        {
            Ok((data_stream, log_stream, data_length, log_length, is_new)) => Ok((
                DiskService {
                    cache,
                    data_factory,
                    log_factory,
                    data_stream: AsyncMutex::new(data_stream),
                    log_stream: AsyncMutex::new(log_stream),
                    data_length: Cell::new(data_length),
                    log_length: Cell::new(log_length),
                    queue: RefCell::new(VecDeque::new()),
                },
                is_new,
            )),
            Err(err) => Err((err, data_factory, log_factory)),
        }
    }

    #[allow(clippy::type_complexity)]
    async fn open_streams(
        data_factory: &SF,
        log_factory: &SF,
        collation: Option<Collation>,
        initial_size: u64,
        cache: &MemoryCache,
    ) -> Result<(Box<dyn FileStream>, Box<dyn FileStream>, u64, u64, bool)> {
        let is_new =
            !data_factory.exists().await || data_factory.len().await.unwrap_or(0) == 0;

        let mut data_stream = data_factory.get_stream().await?;
        let data_length;

        if is_new {
            log::info!("creating new data file");
            let mut header = HeaderPage::new(cache.new_page()?);
            if let Some(collation) = collation {
                header.pragmas_mut().collation = collation;
            }
            let buffer = header.update_buffer();

            data_stream.seek(SeekFrom::Start(0)).await?;
            data_stream.write_all(buffer.buffer()).await?;
            data_stream.flush().await?;

            let length = (PAGE_SIZE as u64).max(initial_size / PAGE_SIZE as u64 * PAGE_SIZE as u64);
            if length > PAGE_SIZE as u64 {
                data_stream.set_len(length).await?;
            }
            data_length = length;

            cache.discard_page(header.into_buffer());
        } else {
            let mut length = data_factory.len().await?;
            if length % PAGE_SIZE as u64 != 0 {
                // torn tail write; drop the partial page
                log::warn!("data file length {length} is not page aligned, truncating");
                length = length / PAGE_SIZE as u64 * PAGE_SIZE as u64;
                data_stream.set_len(length).await?;
            }
            if length == 0 {
                return Err(Error::invalid_database());
            }
            data_length = length;
        }

        let log_stream = log_factory.get_stream().await?;
        let mut log_length = log_factory.len().await.unwrap_or(0);
        if log_length % PAGE_SIZE as u64 != 0 {
            log::warn!("log file length {log_length} is not page aligned, truncating");
            log_length = log_length / PAGE_SIZE as u64 * PAGE_SIZE as u64;
            log_stream.set_len(log_length).await?;
        }

        Ok((data_stream, log_stream, data_length, log_length, is_new))
    }

    /// Dissolves the service back into its factories (rebuild).
    pub fn into_factories(self) -> (SF, SF) {
        (self.data_factory, self.log_factory)
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    pub fn data_factory(&self) -> &SF {
        &self.data_factory
    }

    pub fn log_factory(&self) -> &SF {
        &self.log_factory
    }

    pub fn get_file_length(&self, origin: FileOrigin) -> u64 {
        match origin {
            FileOrigin::Data => self.data_length.get(),
            FileOrigin::Log => self.log_length.get(),
        }
    }

    /// Upper bound on live items, used to detect corrupted-chain loops.
    pub fn max_items_count(&self) -> u32 {
        (((self.data_length.get() + self.log_length.get()) / PAGE_SIZE as u64) * 255)
            .try_into()
            .unwrap_or(u32::MAX)
    }

    async fn read_raw(&self, position: u64, origin: FileOrigin, buffer: &mut PageBufferArray) -> Result<()> {
        let stream = match origin {
            FileOrigin::Data => &self.data_stream,
            FileOrigin::Log => &self.log_stream,
        };
        let mut stream = stream.lock().await;
        stream.seek(SeekFrom::Start(position)).await?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let read = stream.read(&mut buffer[filled..]).await?;
            if read == 0 {
                // reading past the end of the file yields blank pages
                buffer[filled..].fill(0);
                break;
            }
            filled += read;
        }
        Ok(())
    }

    /// Shared read of one page through the cache.
    pub async fn read_page(&self, position: u64, origin: FileOrigin) -> Result<Rc<PageBuffer>> {
        if origin == FileOrigin::Log {
            self.flush_log_queue().await?;
        }
        self.cache
            .get_readable_page(position, origin, async |pos, buffer| {
                self.read_raw(pos, origin, buffer).await
            })
            .await
    }

    /// Exclusive read of one page (copy-on-read through the cache).
    pub async fn read_writable_page(
        &self,
        position: u64,
        origin: FileOrigin,
    ) -> Result<Box<PageBuffer>> {
        if origin == FileOrigin::Log {
            self.flush_log_queue().await?;
        }
        self.cache
            .get_writable_page(position, origin, async |pos, buffer| {
                self.read_raw(pos, origin, buffer).await
            })
            .await
    }

    pub fn new_page(&self) -> Result<Box<PageBuffer>> {
        self.cache.new_page()
    }

    /// Assigns LOG positions and queues the batch; call
    /// [`flush_log_queue`](Self::flush_log_queue) to make it durable.
    pub fn enqueue_log_pages(&self, buffers: Vec<Box<PageBuffer>>) -> Vec<PagePosition> {
        let mut positions = Vec::with_capacity(buffers.len());
        let mut queue = self.queue.borrow_mut();

        for buffer in buffers {
            let position = self.log_length.get();
            self.log_length.set(position + PAGE_SIZE as u64);
            buffer.set_position_origin(position, FileOrigin::Log);

            let page_id = buffer.read_u32(BasePage::P_PAGE_ID);
            positions.push(PagePosition::new(page_id, position));
            queue.push_back(buffer);
        }

        positions
    }

    /// Drains the queue in submission order, flushes once, then publishes
    /// the buffers as readable cache entries.
    pub async fn flush_log_queue(&self) -> Result<()> {
        if self.queue.borrow().is_empty() {
            return Ok(());
        }

        let mut stream = self.log_stream.lock().await;
        let mut written = Vec::new();

        while let Some(buffer) = {
            let mut queue = self.queue.borrow_mut();
            queue.pop_front()
        } {
            stream.seek(SeekFrom::Start(buffer.position())).await?;
            stream.write_all(buffer.buffer()).await?;
            written.push(buffer);
        }

        stream.flush().await?;
        drop(stream);

        for buffer in written {
            self.cache.move_to_readable(buffer);
        }

        Ok(())
    }

    /// Queue + flush in one step; returns the assigned positions.
    pub async fn write_log_disk(
        &self,
        buffers: Vec<Box<PageBuffer>>,
    ) -> Result<Vec<PagePosition>> {
        let positions = self.enqueue_log_pages(buffers);
        self.flush_log_queue().await?;
        Ok(positions)
    }

    /// Positioned writes into the DATA file (checkpoint). Buffers return
    /// to the cache free list afterwards.
    pub async fn write_data_disk(&self, buffers: Vec<Box<PageBuffer>>) -> Result<usize> {
        let mut stream = self.data_stream.lock().await;
        let mut count = 0;

        for buffer in buffers {
            let position = buffer.position();
            stream.seek(SeekFrom::Start(position)).await?;
            stream.write_all(buffer.buffer()).await?;

            let end = position + PAGE_SIZE as u64;
            if end > self.data_length.get() {
                self.data_length.set(end);
            }

            count += 1;
            self.cache.discard_page(buffer);
        }

        stream.flush().await?;
        Ok(count)
    }

    pub async fn set_length(&self, length: u64, origin: FileOrigin) -> Result<()> {
        match origin {
            FileOrigin::Data => {
                self.data_stream.lock().await.set_len(length).await?;
                self.data_length.set(length);
            }
            FileOrigin::Log => {
                debug_assert!(self.queue.borrow().is_empty(), "queue must be drained");
                self.log_stream.lock().await.set_len(length).await?;
                self.log_length.set(length);
            }
        }
        Ok(())
    }

    /// Sequential scan over a whole file; buffers are plain allocations,
    /// not cache entries.
    pub fn read_full(&self, origin: FileOrigin) -> impl Stream<Item = Result<Box<PageBuffer>>> + '_ {
        async_stream::try_stream! {
            let length = self.get_file_length(origin);
            let mut position = 0u64;

            while position < length {
                let mut buffer = Box::new(PageBuffer::new());
                self.read_raw(position, origin, buffer.buffer_mut()).await?;
                buffer.set_position_origin(position, origin);
                position += PAGE_SIZE as u64;
                yield buffer;
            }
        }
    }

    /// Rollback path: dirty buffers simply return to the free list.
    pub fn discard_dirty_pages(&self, pages: Vec<Box<PageBuffer>>) {
        for page in pages {
            self.cache.discard_page(page);
        }
    }

    /// Never-modified writable buffers may still serve readers.
    pub fn discard_clean_pages(&self, pages: Vec<Box<PageBuffer>>) {
        for page in pages {
            if let Err(page) = self.cache.try_move_to_readable(page) {
                self.cache.discard_page(page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStreamFactory;
    use futures::TryStreamExt;
    use std::pin::pin;

    async fn open_memory() -> DiskService<MemoryStreamFactory> {
        let (disk, is_new) = DiskService::new(
            MemoryStreamFactory::new(),
            MemoryStreamFactory::new(),
            None,
            0,
        )
        .await
        .map_err(|(err, _, _)| err)
        .unwrap();
        assert!(is_new);
        disk
    }

    #[tokio::test]
    async fn queued_log_writes_land_in_order_and_read_back() {
        let disk = open_memory().await;

        // fill 100 pages, each with its own byte, and queue them
        for i in 0..100u8 {
            let mut page = disk.new_page().unwrap();
            page.buffer_mut().fill(i);
            disk.enqueue_log_pages(vec![page]);
        }

        assert_eq!(
            disk.get_file_length(FileOrigin::Log),
            100 * PAGE_SIZE as u64,
            "positions are assigned at enqueue time"
        );

        disk.flush_log_queue().await.unwrap();

        for i in 0..100u8 {
            let page = disk
                .read_page(i as u64 * PAGE_SIZE as u64, FileOrigin::Log)
                .await
                .unwrap();
            assert!(page.buffer().iter().all(|&b| b == i), "page {i} content");
        }

        assert_eq!(disk.cache().pages_in_use(), 0);
    }

    #[tokio::test]
    async fn log_reads_force_a_flush() {
        let disk = open_memory().await;

        let mut page = disk.new_page().unwrap();
        page.buffer_mut().fill(7);
        let positions = disk.enqueue_log_pages(vec![page]);

        // not flushed yet, but the read path drains the queue first
        let read = disk
            .read_page(positions[0].position(), FileOrigin::Log)
            .await
            .unwrap();
        assert_eq!(read.buffer()[0], 7);
        assert_eq!(disk.log_factory().len().await.unwrap(), PAGE_SIZE as u64);
    }

    #[tokio::test]
    async fn bootstrap_writes_a_loadable_header() {
        let disk = open_memory().await;

        let mut stream = pin!(disk.read_full(FileOrigin::Data));
        let first = stream.try_next().await.unwrap().unwrap();
        let header = HeaderPage::load(first).unwrap();
        assert_eq!(header.last_page_id(), 0);
        assert_eq!(header.free_empty_page_list(), u32::MAX);
    }
}
