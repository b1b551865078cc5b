use crate::engine::*;
use crate::{Error, Result};
use async_lock::Mutex as AsyncMutex;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::AsyncFnOnce;
use std::rc::Rc;

/// Owns every in-memory page buffer.
///
/// Readable pages are published in a map keyed by `(origin, position)` and
/// shared as `Rc<PageBuffer>`; the share count of a page is its strong
/// count minus the map's own reference. Writable pages are exclusive
/// `Box<PageBuffer>`s drawn from the free list and are never shared.
///
/// The free list grows by the `MEMORY_SEGMENT_SIZES` profile until
/// `MAX_CACHE_PAGES`; past that, unreferenced readable pages are reclaimed
/// in oldest-LRU order, and when nothing can be reclaimed the cache fails
/// with `CacheLimitReached`.
pub(crate) struct MemoryCache {
    readable: RefCell<HashMap<PositionOrigin, Rc<PageBuffer>>>,
    free: RefCell<Vec<Box<PageBuffer>>>,
    // guards the miss path so one faulting task loads each page
    read_lock: AsyncMutex<()>,
    segments: Cell<usize>,
    allocated: Cell<usize>,
    tick: Cell<u64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache {
            readable: RefCell::new(HashMap::new()),
            free: RefCell::new(Vec::new()),
            read_lock: AsyncMutex::new(()),
            segments: Cell::new(0),
            allocated: Cell::new(0),
            tick: Cell::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        let tick = self.tick.get() + 1;
        self.tick.set(tick);
        tick
    }

    pub async fn get_readable_page(
        &self,
        position: u64,
        origin: FileOrigin,
        factory: impl AsyncFnOnce(u64, &mut PageBufferArray) -> Result<()>,
    ) -> Result<Rc<PageBuffer>> {
        let key = PositionOrigin::new(position, origin);

        if let Some(existing) = self.readable.borrow().get(&key) {
            existing.update_time(self.next_tick());
            return Ok(existing.clone());
        }

        let _read_lock = self.read_lock.lock().await;

        // another task may have faulted the page in while we waited
        if let Some(existing) = self.readable.borrow().get(&key) {
            existing.update_time(self.next_tick());
            return Ok(existing.clone());
        }

        let mut page = self.get_free_page()?;
        page.set_position_origin(position, origin);
        if let Err(err) = factory(position, page.buffer_mut()).await {
            self.discard_page(page);
            return Err(err);
        }

        let page = Rc::new(*page);
        page.update_time(self.next_tick());
        self.readable.borrow_mut().insert(key, page.clone());

        Ok(page)
    }

    /// Exclusive copy of the page at `(position, origin)`: byte-copied
    /// from a published readable when one exists, loaded via `factory`
    /// otherwise.
    pub async fn get_writable_page(
        &self,
        position: u64,
        origin: FileOrigin,
        factory: impl AsyncFnOnce(u64, &mut PageBufferArray) -> Result<()>,
    ) -> Result<Box<PageBuffer>> {
        let mut page = self.get_free_page()?;
        page.set_position_origin(position, origin);

        let readable = self
            .readable
            .borrow()
            .get(&PositionOrigin::new(position, origin))
            .cloned();
        match readable {
            Some(readable) => *page.buffer_mut() = *readable.buffer(),
            None => {
                if let Err(err) = factory(position, page.buffer_mut()).await {
                    self.discard_page(page);
                    return Err(err);
                }
            }
        }

        Ok(page)
    }

    /// Exclusive zeroed page with no file identity yet.
    pub fn new_page(&self) -> Result<Box<PageBuffer>> {
        let mut page = self.get_free_page()?;
        page.buffer_mut().fill(0);
        page.reset();
        Ok(page)
    }

    /// Publishes a writable page under its key unless a readable already
    /// exists there; the page comes back on refusal.
    pub fn try_move_to_readable(
        &self,
        page: Box<PageBuffer>,
    ) -> std::result::Result<Rc<PageBuffer>, Box<PageBuffer>> {
        debug_assert!(page.position() != u64::MAX, "page must have a position");
        debug_assert!(page.origin().is_some(), "page must have an origin");

        let key = PositionOrigin::new(page.position(), page.origin().unwrap());

        match self.readable.borrow_mut().entry(key) {
            Entry::Occupied(_) => Err(page),
            Entry::Vacant(v) => {
                page.update_time(self.tick.get());
                Ok(v.insert(Rc::new(*page)).clone())
            }
        }
    }

    /// Publishes a writable page, overwriting any prior readable version
    /// (which must not be shared at that point).
    pub fn move_to_readable(&self, page: Box<PageBuffer>) -> Rc<PageBuffer> {
        debug_assert!(page.position() != u64::MAX, "page must have a position");
        debug_assert!(page.origin().is_some(), "page must have an origin");

        let origin = page.origin().unwrap();
        let key = PositionOrigin::new(page.position(), origin);

        match self.readable.borrow_mut().entry(key) {
            Entry::Occupied(mut o) => {
                debug_assert_eq!(o.get().origin(), Some(origin), "origin must match");

                let target = Rc::get_mut(o.get_mut())
                    .expect("page must not be in use when replaced in cache");
                *target.buffer_mut() = *page.buffer();

                self.discard_page(page);
                o.get().clone()
            }
            Entry::Vacant(v) => {
                page.update_time(self.tick.get());
                v.insert(Rc::new(*page)).clone()
            }
        }
    }

    /// Returns a writable buffer to the free list. Content is cleared
    /// lazily by `new_page`.
    pub fn discard_page(&self, page: Box<PageBuffer>) {
        self.free.borrow_mut().push(page);
    }

    fn get_free_page(&self) -> Result<Box<PageBuffer>> {
        if let Some(page) = self.free.borrow_mut().pop() {
            return Ok(page);
        }

        if self.allocated.get() < MAX_CACHE_PAGES {
            self.extend()?;
        } else {
            self.reclaim()?;
        }

        self.free
            .borrow_mut()
            .pop()
            .ok_or_else(Error::cache_limit_exceeded)
    }

    fn extend(&self) -> Result<()> {
        let segment = self.segments.get();
        let size = MEMORY_SEGMENT_SIZES[segment.min(MEMORY_SEGMENT_SIZES.len() - 1)]
            .min(MAX_CACHE_PAGES - self.allocated.get());
        self.segments.set(segment + 1);

        log::debug!(
            "extending memory cache by {size} pages ({} allocated)",
            self.allocated.get()
        );

        let mut free = self.free.borrow_mut();
        free.reserve(size);
        for _ in 0..size {
            free.push(Box::new(PageBuffer::new()));
        }
        self.allocated.set(self.allocated.get() + size);
        Ok(())
    }

    /// Unpublishes unreferenced readable pages, oldest first.
    fn reclaim(&self) -> Result<()> {
        let mut readable = self.readable.borrow_mut();

        let mut candidates: Vec<(u64, PositionOrigin)> = readable
            .iter()
            .filter(|(_, page)| Rc::strong_count(page) == 1)
            .map(|(&key, page)| (page.timestamp(), key))
            .collect();

        if candidates.is_empty() {
            return Err(Error::cache_limit_exceeded());
        }

        candidates.sort_unstable_by_key(|&(timestamp, _)| timestamp);

        let target = MEMORY_SEGMENT_SIZES[0].min(candidates.len());
        let mut free = self.free.borrow_mut();
        for &(_, key) in candidates.iter().take(target) {
            let page = readable.remove(&key).unwrap();
            let mut page = Rc::try_unwrap(page)
                .unwrap_or_else(|_| unreachable!("strong count was 1"));
            page.reset();
            free.push(Box::new(page));
        }

        log::debug!("reclaimed {target} cache pages");
        Ok(())
    }

    /// Drops all published LOG pages (after checkpoint truncates the LOG).
    pub fn clear_log_pages(&self) {
        let mut readable = self.readable.borrow_mut();
        let keys: Vec<PositionOrigin> = readable
            .keys()
            .filter(|key| key.origin() == FileOrigin::Log)
            .copied()
            .collect();

        let mut free = self.free.borrow_mut();
        for key in keys {
            let page = readable.remove(&key).unwrap();
            if let Ok(mut page) = Rc::try_unwrap(page) {
                page.reset();
                free.push(Box::new(page));
            }
        }
    }

    /// Outstanding shared references across all readable pages.
    pub fn pages_in_use(&self) -> usize {
        self.readable
            .borrow()
            .values()
            .map(|page| Rc::strong_count(page) - 1)
            .sum()
    }

    pub fn clear(&self) {
        assert_eq!(self.pages_in_use(), 0, "all pages must be released");
        let mut readable = self.readable.borrow_mut();
        let mut free = self.free.borrow_mut();
        for (_, page) in readable.drain() {
            let mut page =
                Rc::try_unwrap(page).unwrap_or_else(|_| unreachable!("no pages in use"));
            page.reset();
            free.push(Box::new(page));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(value: u8) -> impl AsyncFnOnce(u64, &mut PageBufferArray) -> Result<()> {
        async move |_, buffer: &mut PageBufferArray| {
            buffer.fill(value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn readable_pages_are_shared() {
        let cache = MemoryCache::new();

        let a = cache
            .get_readable_page(0, FileOrigin::Data, fill(7))
            .await
            .unwrap();
        let b = cache
            .get_readable_page(0, FileOrigin::Data, fill(9))
            .await
            .unwrap();

        // second get was a cache hit; the factory never ran
        assert_eq!(b.buffer()[0], 7);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.pages_in_use(), 2);

        drop(a);
        drop(b);
        assert_eq!(cache.pages_in_use(), 0);
    }

    #[tokio::test]
    async fn log_and_data_keys_do_not_collide() {
        let cache = MemoryCache::new();

        let data = cache
            .get_readable_page(8192, FileOrigin::Data, fill(1))
            .await
            .unwrap();
        let log = cache
            .get_readable_page(8192, FileOrigin::Log, fill(2))
            .await
            .unwrap();

        assert_eq!(data.buffer()[0], 1);
        assert_eq!(log.buffer()[0], 2);
    }

    #[tokio::test]
    async fn writable_copies_from_readable() {
        let cache = MemoryCache::new();

        cache
            .get_readable_page(0, FileOrigin::Data, fill(5))
            .await
            .unwrap();
        let writable = cache
            .get_writable_page(0, FileOrigin::Data, fill(6))
            .await
            .unwrap();

        assert_eq!(writable.buffer()[0], 5);
    }

    #[tokio::test]
    async fn try_move_to_readable_refuses_duplicates() {
        let cache = MemoryCache::new();

        let page = cache.new_page().unwrap();
        page.set_position_origin(0, FileOrigin::Log);
        assert!(cache.try_move_to_readable(page).is_ok());

        let page = cache.new_page().unwrap();
        page.set_position_origin(0, FileOrigin::Log);
        assert!(cache.try_move_to_readable(page).is_err());
    }

    #[tokio::test]
    async fn new_page_is_zeroed_after_discard() {
        let cache = MemoryCache::new();

        let mut page = cache.new_page().unwrap();
        page.buffer_mut().fill(0xAB);
        cache.discard_page(page);

        let page = cache.new_page().unwrap();
        assert!(page.buffer().iter().all(|&b| b == 0));
    }
}
