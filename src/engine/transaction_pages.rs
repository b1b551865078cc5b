use crate::engine::page_position::PagePosition;
use crate::engine::pages::HeaderPage;
use indexmap::IndexMap;

/// Bookkeeping shared by a transaction and its snapshots.
///
/// `dirty_pages` maps page id to the LOG position of the transaction's own
/// latest spilled copy (insertion order is LOG write order); `new_pages`
/// and the deleted-page chain feed the header free list at commit or
/// rollback time.
pub(crate) struct TransactionPages {
    pub transaction_size: u32,
    pub dirty_pages: IndexMap<u32, PagePosition>,
    new_pages: Vec<u32>,
    first_deleted_page: u32,
    last_deleted_page: u32,
    deleted_pages: usize,

    #[allow(clippy::type_complexity)]
    on_commit: Vec<Box<dyn Fn(&mut HeaderPage)>>,
}

impl TransactionPages {
    pub fn new() -> Self {
        Self {
            transaction_size: 0,
            dirty_pages: IndexMap::new(),
            new_pages: Vec::new(),
            first_deleted_page: u32::MAX,
            last_deleted_page: u32::MAX,
            deleted_pages: 0,
            on_commit: Vec::new(),
        }
    }

    /// True when committing must also write the header page (free chain or
    /// collection directory changed).
    pub fn header_changed(&self) -> bool {
        !self.new_pages.is_empty() || self.deleted_pages > 0 || !self.on_commit.is_empty()
    }

    pub fn on_commit(&mut self, f: impl Fn(&mut HeaderPage) + 'static) {
        self.on_commit.push(Box::new(f));
    }

    pub fn call_on_commit(&mut self, header: &mut HeaderPage) {
        for on_commit in &self.on_commit {
            on_commit(header);
        }
    }

    pub fn first_deleted_page(&self) -> u32 {
        self.first_deleted_page
    }

    pub fn last_deleted_page(&self) -> u32 {
        self.last_deleted_page
    }

    pub fn set_first_deleted_page(&mut self, page_id: u32) {
        self.first_deleted_page = page_id;
    }

    pub fn set_last_deleted_page(&mut self, page_id: u32) {
        self.last_deleted_page = page_id;
    }

    pub fn deleted_pages(&self) -> usize {
        self.deleted_pages
    }

    pub fn inc_deleted_pages(&mut self) {
        self.deleted_pages += 1;
    }

    pub fn new_pages(&self) -> &[u32] {
        &self.new_pages
    }

    pub fn add_new_page(&mut self, page_id: u32) {
        self.new_pages.push(page_id);
    }
}
