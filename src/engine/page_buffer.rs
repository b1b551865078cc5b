use crate::engine::*;
use crate::utils::BufferSlice;
use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileOrigin {
    Data = 1,
    Log = 2,
}

/// The pair of a file position and an origin, used as the readable-cache
/// key. The highest bit distinguishes the files: 0 = data, 1 = log.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PositionOrigin(u64);

impl PositionOrigin {
    const ORIGIN_MASK: u64 = 1 << 63;

    pub fn new(position: u64, origin: FileOrigin) -> Self {
        assert!(
            position < i64::MAX as u64,
            "offset must not exceed i64::MAX"
        );
        let origin = match origin {
            FileOrigin::Data => 0,
            FileOrigin::Log => Self::ORIGIN_MASK,
        };
        PositionOrigin(position | origin)
    }

    pub fn position(&self) -> u64 {
        self.0 & !Self::ORIGIN_MASK
    }

    pub fn origin(&self) -> FileOrigin {
        if self.0 & Self::ORIGIN_MASK == 0 {
            FileOrigin::Data
        } else {
            FileOrigin::Log
        }
    }
}

impl fmt::Debug for PositionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionOrigin")
            .field("position", &self.position())
            .field("origin", &self.origin())
            .finish()
    }
}

/// One page-sized block of memory plus its file identity.
///
/// Readable pages are shared as `Rc<PageBuffer>` (the share counter is the
/// strong count minus the cache's own reference); writable pages are owned
/// `Box<PageBuffer>` and never shared. Identity fields are `Cell`s so the
/// cache can stamp LRU times through shared handles.
pub(crate) struct PageBuffer {
    position: Cell<u64>,
    origin: Cell<Option<FileOrigin>>,
    timestamp: Cell<u64>,
    buffer: PageBufferArray,
}

impl PageBuffer {
    pub fn new() -> Self {
        PageBuffer {
            position: Cell::new(u64::MAX),
            origin: Cell::new(None),
            timestamp: Cell::new(0),
            buffer: [0; PAGE_SIZE],
        }
    }

    pub fn set_position_origin(&self, position: u64, origin: FileOrigin) {
        self.position.set(position);
        self.origin.set(Some(origin));
    }

    pub fn set_position(&self, position: u64) {
        self.position.set(position);
    }

    pub fn reset(&mut self) {
        self.position.set(u64::MAX);
        self.origin.set(None);
        self.timestamp.set(0);
    }

    pub fn buffer(&self) -> &PageBufferArray {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PageBufferArray {
        &mut self.buffer
    }

    pub fn update_time(&self, timestamp: u64) {
        self.timestamp.set(timestamp);
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }

    pub fn position(&self) -> u64 {
        self.position.get()
    }

    pub fn origin(&self) -> Option<FileOrigin> {
        self.origin.get()
    }

    /// An all-zero page header means an unused region of the file.
    pub fn is_blank(&self) -> bool {
        self.buffer[..16].iter().all(|&b| b == 0)
    }
}

impl Deref for PageBuffer {
    type Target = BufferSlice;

    fn deref(&self) -> &Self::Target {
        BufferSlice::new(&self.buffer)
    }
}

impl DerefMut for PageBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        BufferSlice::new_mut(&mut self.buffer)
    }
}
