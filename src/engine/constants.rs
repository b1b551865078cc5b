/// The size of each page in disk - 8192 as all major databases
pub(crate) const PAGE_SIZE: usize = 8192;
/// header size of each page
pub(crate) const PAGE_HEADER_SIZE: usize = 32;

/// free-page buckets per collection (0: fullest .. 4: emptiest)
pub(crate) const PAGE_FREE_LIST_SLOTS: usize = 5;

/// documents are chained across pages; one document tops out at 16 MiB
pub(crate) const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// skiplist height cap
pub(crate) const MAX_LEVEL_LENGTH: u8 = 32;
/// ordered index keys are length-limited
pub(crate) const MAX_INDEX_KEY_LENGTH: usize = 1023;
/// indexes per collection (slot is a byte)
pub(crate) const MAX_INDEXES_PER_COLLECTION: usize = 255;

/// vector graph caps
pub(crate) const MAX_VECTOR_LEVELS: u8 = 4;
pub(crate) const MAX_NEIGHBORS_PER_LEVEL: usize = 8;
/// below this node count searches scan the whole chain (exact results)
pub(crate) const VECTOR_FULL_SCAN_LIMIT: u32 = 128;

/// transaction memory budget, in pages, shared by all open transactions
pub(crate) const MAX_TRANSACTION_SIZE: u32 = 100_000;
pub(crate) const MAX_OPEN_TRANSACTIONS: usize = 100;

/// cache growth profile: free-list extension sizes, then the hard cap
pub(crate) const MEMORY_SEGMENT_SIZES: [usize; 5] = [100, 200, 400, 800, 1600];
pub(crate) const MAX_CACHE_PAGES: usize = 10_000;

/// data file grows in chunks of this many pages
pub(crate) const FILE_GROWTH_PAGES: usize = 16;
